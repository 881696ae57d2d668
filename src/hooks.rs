//! Lifecycle hook dispatch and the capabilities it rides on.
//!
//! A handler is either an HTTP GET against a host/port/path or a command
//! executed inside the container. Both capabilities are injected so the
//! sync engine stays runtime-agnostic and the tests can observe exactly
//! what was invoked.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::AgentError;
use crate::pod::{ContainerSpec, Handler};

/// Minimal HTTP GET capability used by hooks and probes.
#[async_trait]
pub trait HttpGetter: Send + Sync {
    /// Issue a GET and return the response status code.
    async fn get(&self, url: &str) -> Result<u16, AgentError>;
}

/// Command execution inside a running container.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` inside the container and return its stdout. A non-zero
    /// exit surfaces as an error.
    async fn run_in_container(
        &self,
        container_id: &str,
        command: &[String],
    ) -> Result<Vec<u8>, AgentError>;
}

/// `HttpGetter` backed by a shared reqwest client.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpGetter for HttpClient {
    async fn get(&self, url: &str) -> Result<u16, AgentError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::Http(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}

/// Run a lifecycle handler for a container.
///
/// An empty handler is a successful no-op. `hook` names the lifecycle phase
/// for error reporting ("post-start" / "pre-stop").
pub async fn run_handler(
    http: &dyn HttpGetter,
    runner: &dyn CommandRunner,
    pod_full_name: &str,
    container_id: &str,
    spec: &ContainerSpec,
    handler: &Handler,
    hook: &'static str,
) -> Result<(), AgentError> {
    if let Some(http_get) = &handler.http_get {
        let url = format!("http://{}:{}/{}", http_get.host, http_get.port, http_get.path);
        debug!(pod = %pod_full_name, container = %spec.name, url = %url, hook, "running HTTP handler");
        let status = http.get(&url).await.map_err(|e| AgentError::Handler {
            hook,
            container: spec.name.clone(),
            reason: e.to_string(),
        })?;
        if !(200..300).contains(&status) {
            return Err(AgentError::Handler {
                hook,
                container: spec.name.clone(),
                reason: format!("unexpected status {status} from {url}"),
            });
        }
        return Ok(());
    }

    if let Some(exec) = &handler.exec {
        debug!(pod = %pod_full_name, container = %spec.name, hook, "running exec handler");
        runner
            .run_in_container(container_id, &exec.command)
            .await
            .map_err(|e| AgentError::Handler {
                hook,
                container: spec.name.clone(),
                reason: e.to_string(),
            })?;
        return Ok(());
    }

    // Neither action set: nothing to run.
    Ok(())
}

// =============================================================================
// Fakes (testing and development)
// =============================================================================

/// Recording `HttpGetter` returning a configured status.
#[derive(Debug)]
pub struct FakeHttpGetter {
    urls: Mutex<Vec<String>>,
    status: u16,
    error: Option<String>,
}

impl FakeHttpGetter {
    pub fn new() -> Self {
        Self {
            urls: Mutex::new(Vec::new()),
            status: 200,
            error: None,
        }
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::new()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Default for FakeHttpGetter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpGetter for FakeHttpGetter {
    async fn get(&self, url: &str) -> Result<u16, AgentError> {
        self.urls.lock().unwrap().push(url.to_string());
        match &self.error {
            Some(message) => Err(AgentError::Http(message.clone())),
            None => Ok(self.status),
        }
    }
}

/// Recording `CommandRunner`.
#[derive(Debug, Default)]
pub struct FakeCommandRunner {
    runs: Mutex<Vec<(String, Vec<String>)>>,
    error: Option<String>,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// `(container id, command)` pairs observed so far.
    pub fn runs(&self) -> Vec<(String, Vec<String>)> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run_in_container(
        &self,
        container_id: &str,
        command: &[String],
    ) -> Result<Vec<u8>, AgentError> {
        self.runs
            .lock()
            .unwrap()
            .push((container_id.to_string(), command.to_vec()));
        match &self.error {
            Some(message) => Err(AgentError::Runtime(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::{ExecAction, HttpGetAction};

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "containerFoo".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_http_handler_builds_url() {
        let http = FakeHttpGetter::new();
        let runner = FakeCommandRunner::new();
        let handler = Handler {
            http_get: Some(HttpGetAction {
                host: "foo".to_string(),
                port: 8080,
                path: "bar".to_string(),
            }),
            exec: None,
        };
        run_handler(&http, &runner, "podFoo.etcd", "abc1234", &spec(), &handler, "post-start")
            .await
            .unwrap();
        assert_eq!(http.urls(), vec!["http://foo:8080/bar"]);
        assert!(runner.runs().is_empty());
    }

    #[tokio::test]
    async fn test_exec_handler_runs_in_container() {
        let http = FakeHttpGetter::new();
        let runner = FakeCommandRunner::new();
        let handler = Handler {
            http_get: None,
            exec: Some(ExecAction {
                command: vec!["ls".to_string(), "-a".to_string()],
            }),
        };
        run_handler(&http, &runner, "podFoo.etcd", "abc1234", &spec(), &handler, "post-start")
            .await
            .unwrap();
        let runs = runner.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "abc1234");
        assert_eq!(runs[0].1, vec!["ls", "-a"]);
    }

    #[tokio::test]
    async fn test_empty_handler_is_noop() {
        let http = FakeHttpGetter::new();
        let runner = FakeCommandRunner::new();
        run_handler(
            &http,
            &runner,
            "podFoo.etcd",
            "abc1234",
            &spec(),
            &Handler::default(),
            "post-start",
        )
        .await
        .unwrap();
        assert!(http.urls().is_empty());
        assert!(runner.runs().is_empty());
    }

    #[tokio::test]
    async fn test_http_handler_failure() {
        let http = FakeHttpGetter::failing("connection refused");
        let runner = FakeCommandRunner::new();
        let handler = Handler {
            http_get: Some(HttpGetAction {
                host: "does.no.exist".to_string(),
                port: 8080,
                path: "bar".to_string(),
            }),
            exec: None,
        };
        let err = run_handler(
            &http,
            &runner,
            "foo.test",
            "abc1234",
            &spec(),
            &handler,
            "post-start",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Handler { hook: "post-start", .. }));
    }

    #[tokio::test]
    async fn test_http_handler_non_2xx_fails() {
        let http = FakeHttpGetter::with_status(500);
        let runner = FakeCommandRunner::new();
        let handler = Handler {
            http_get: Some(HttpGetAction {
                host: "foo".to_string(),
                port: 8080,
                path: "bar".to_string(),
            }),
            exec: None,
        };
        let err = run_handler(&http, &runner, "foo.test", "abc1234", &spec(), &handler, "pre-stop")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}

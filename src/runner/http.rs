//! HTTP runner backend

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use super::{Outcome, RunnerBackend, RunnerError};
use crate::dsl::{HttpMethod, HttpRunner, RunnerConfig, TestMode};

/// Sends one request per execution with a shared `reqwest` client
#[derive(Debug, Clone, Default)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    /// Creates a backend with a default client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend around an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request(&self, runner: &HttpRunner) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method(runner.method), &runner.endpoint);
        if let Some((name, value)) = runner.header_pair() {
            request = request.header(name, value);
        }
        if let Some(payload) = &runner.payload
            && runner.method.carries_payload()
        {
            request = request.body(payload.clone());
        }
        request
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

#[async_trait]
impl RunnerBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, config: &RunnerConfig) -> Result<Outcome, RunnerError> {
        let RunnerConfig::Http(runner) = config else {
            return Err(RunnerError::execution(
                config.mode(),
                "mode is not served by the http backend",
            ));
        };

        debug!(method = %runner.method, endpoint = %runner.endpoint, "Sending request");

        let response = self
            .request(runner)
            .send()
            .await
            .map_err(|e| RunnerError::execution(TestMode::Http, e.to_string()))?;
        let status = i32::from(response.status().as_u16());
        let body = response
            .text()
            .await
            .map_err(|e| RunnerError::execution(TestMode::Http, e.to_string()))?;

        Ok(Outcome::response(status, body))
    }
}

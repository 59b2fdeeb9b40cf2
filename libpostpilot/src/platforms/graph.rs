//! Minimal Graph API client shared by the Facebook and Instagram adapters

use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;

use crate::config::GraphPlatformConfig;
use crate::error::PlatformError;

type GraphResult<T> = std::result::Result<T, PlatformError>;

#[derive(Clone)]
pub struct GraphClient {
    base_url: String,
    http: Client,
}

impl GraphClient {
    pub fn new(config: &GraphPlatformConfig) -> GraphResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PlatformError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.graph_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Form-encoded POST; `phase` names the protocol step in errors
    pub async fn post(
        &self,
        phase: &str,
        path: &str,
        token: &SecretString,
        params: &[(&str, String)],
    ) -> GraphResult<Value> {
        let mut form: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        form.push(("access_token", token.expose_secret()));

        tracing::debug!(phase = %phase, path = %path, "Graph POST");

        let response = self
            .http
            .post(self.url(path))
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(phase, e))?;

        read_response(phase, response).await
    }

    pub async fn get(
        &self,
        phase: &str,
        path: &str,
        token: &SecretString,
        query: &[(&str, &str)],
    ) -> GraphResult<Value> {
        let mut params = query.to_vec();
        params.push(("access_token", token.expose_secret()));

        let response = self
            .http
            .get(self.url(path))
            .query(&params)
            .send()
            .await
            .map_err(|e| transport_error(phase, e))?;

        read_response(phase, response).await
    }
}

fn transport_error(phase: &str, err: reqwest::Error) -> PlatformError {
    if err.is_timeout() {
        PlatformError::Network(format!("{}: request timed out", phase))
    } else {
        // Strip the URL so the access token never lands in a log or last_error
        PlatformError::Network(format!("{}: {}", phase, err.without_url()))
    }
}

async fn read_response(phase: &str, response: Response) -> GraphResult<Value> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(phase, e))?;
    let json: Option<Value> = serde_json::from_str(&body).ok();

    if status.is_server_error() {
        return Err(PlatformError::Network(format!(
            "{}: HTTP {}{}",
            phase,
            status.as_u16(),
            graph_message(json.as_ref())
        )));
    }

    if !status.is_success() {
        return Err(PlatformError::Protocol(format!(
            "{}: HTTP {}{}",
            phase,
            status.as_u16(),
            graph_message(json.as_ref())
        )));
    }

    match json {
        Some(value) if value.get("error").is_some() => Err(PlatformError::Protocol(format!(
            "{}: HTTP {}{}",
            phase,
            StatusCode::OK.as_u16(),
            graph_message(Some(&value))
        ))),
        Some(value) => Ok(value),
        None => Err(PlatformError::Protocol(format!(
            "{}: response was not JSON",
            phase
        ))),
    }
}

/// `": (#code) message"` from a Graph error body, or nothing
fn graph_message(body: Option<&Value>) -> String {
    let Some(error) = body.and_then(|b| b.get("error")) else {
        return String::new();
    };

    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");

    match error.get("code").and_then(Value::as_i64) {
        Some(code) => format!(": (#{}) {}", code, message),
        None => format!(": {}", message),
    }
}

/// Pull an object id out of a Graph response
pub fn response_id(phase: &str, value: &Value, key: &str) -> GraphResult<String> {
    match value.get(key) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PlatformError::Protocol(format!(
            "{}: response has no '{}'",
            phase, key
        ))),
    }
}

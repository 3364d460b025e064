use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};

use crate::traits::{ExecutableNode, ExecutionContext, NodeCategory, NodeDescriptor};
use crate::NodeError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Generic HTTP integration (`integration_type = "http"`).
///
/// Credentials: `token` becomes a bearer header, `username`/`password`
/// become basic auth.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for HttpRequestNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            node_type: "http_request".into(),
            label: "HTTP Request".into(),
            category: NodeCategory::Integration,
            integration_type: Some("http".into()),
            description: "Calls an HTTP endpoint and returns status, headers and body".into(),
            config_schema: json!({
                "type": "object",
                "properties": {
                    "method": { "type": "string", "default": "GET" },
                    "url": { "type": "string" },
                    "headers": { "type": "object" },
                    "query": { "type": "object" },
                    "body": {},
                    "timeout_seconds": { "type": "number" }
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, _input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let config = &ctx.config;
        let url = config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Config("http_request: 'url' is required".into()))?;
        let method = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| NodeError::Config(format!("http_request: invalid method '{method}'")))?;
        let timeout = config
            .get("timeout_seconds")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_TIMEOUT);

        let mut request = self.client.request(method, url).timeout(timeout);

        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let value = value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string());
                request = request.header(name.as_str(), value);
            }
        }
        if let Some(query) = config.get("query").and_then(Value::as_object) {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().map(str::to_owned).unwrap_or_else(|| v.to_string())))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(token) = ctx.credentials.get("token") {
            request = request.bearer_auth(token);
        } else if let Some(user) = ctx.credentials.get("username") {
            request = request.basic_auth(user, ctx.credentials.get("password"));
        }
        match config.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => request = request.body(s.clone()),
            Some(body) => request = request.json(body),
        }

        ctx.console("info", format!("HTTP request to {url}"));
        let response = request.send().await.map_err(map_transport_error)?;

        let status = response.status();
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), Value::String(v.to_owned()));
            }
        }
        let text = response.text().await.map_err(map_transport_error)?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if status.as_u16() == 429 {
            return Err(NodeError::integration("rate_limited", format!("{url} returned 429")));
        }
        if status.is_server_error() {
            return Err(NodeError::integration("http_5xx", format!("{url} returned {status}")));
        }
        if status.is_client_error() {
            return Err(NodeError::integration("http_4xx", format!("{url} returned {status}")));
        }

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }
}

fn map_transport_error(err: reqwest::Error) -> NodeError {
    if err.is_timeout() {
        NodeError::Timeout(err.to_string())
    } else if err.is_builder() {
        NodeError::Config(err.to_string())
    } else {
        NodeError::integration("network", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn missing_url_is_a_config_error() {
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), "call");
        let err = HttpRequestNode::new().execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), "call");
        // Port 9 on localhost is the discard port and normally closed.
        ctx.config = json!({ "url": "http://127.0.0.1:9/", "timeout_seconds": 2 });
        let err = HttpRequestNode::new().execute(json!({}), &ctx).await.unwrap_err();
        assert!(err.is_retryable());
    }
}

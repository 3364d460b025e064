//! Webhook Gateway.
//!
//! Owns the webhook rows: CRUD goes through here, and so does every inbound
//! call. An inbound call is checked in this order, and a rejection never
//! creates an execution:
//!
//! 1. a webhook exists at the path (404)
//! 2. the webhook is enabled (403)
//! 3. the HTTP method matches (405)
//! 4. the caller IP is in `allowed_ips`, when set (403)
//! 5. `require_auth`: shared secret or HMAC-SHA256 signature (401)
//! 6. sliding-window rate limit (429)
//! 7. the workflow is active (409)

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use db::models::{ExecutionRow, ExecutionStatus, ResponseMode, TriggerType, WebhookRow, WorkflowStatus};
use db::{DbError, Store};
use nodes::template;

use crate::dispatcher::{Dispatcher, TriggerRequest};
use crate::EngineError;

pub const SECRET_HEADER: &str = "x-webhook-secret";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Why an inbound call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WebhookRejection {
    #[error("no webhook at this path")]
    NotFound,
    #[error("webhook is disabled")]
    Disabled,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("caller address not allowed")]
    Forbidden,
    #[error("missing or invalid webhook credentials")]
    Unauthorized,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("workflow is not active")]
    WorkflowInactive,
}

/// Body of webhook create/update calls. On update, absent fields keep
/// their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookInput {
    pub method: Option<String>,
    pub enabled: Option<bool>,
    pub require_auth: Option<bool>,
    pub secret_key: Option<String>,
    /// Issue a fresh secret.
    #[serde(default)]
    pub regenerate_secret: bool,
    pub allowed_ips: Option<Vec<String>>,
    pub response_mode: Option<String>,
    pub response_data: Option<Value>,
    pub rate_limit_max_calls: Option<i32>,
    pub rate_limit_window_seconds: Option<i32>,
}

/// An HTTP call as the gateway sees it.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub path: String,
    pub method: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Parsed JSON body, `Null` when empty or not JSON.
    pub body: Value,
    /// Exactly the bytes the signature was computed over.
    pub raw_body: Vec<u8>,
    pub remote_ip: Option<IpAddr>,
}

/// What to answer the caller with.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
    pub execution_id: Uuid,
}

/// `whsec_` plus 64 hex digits.
fn generate_secret() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    format!("whsec_{}", hex::encode(hasher.finalize()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hex-encoded HMAC-SHA256 of `body` under `secret`, as expected in the
/// signature header after `sha256=`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn signature_matches(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(digest) = header.strip_prefix("sha256=").and_then(|h| hex::decode(h.trim()).ok()) else {
        return false;
    };
    let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&digest).is_ok()
}

/// `entry` is a single address or a CIDR block.
fn ip_allowed(entry: &str, ip: IpAddr) -> bool {
    let Some((net, bits)) = entry.split_once('/') else {
        return IpAddr::from_str(entry.trim()).is_ok_and(|allowed| allowed == ip);
    };
    let (Ok(net), Ok(bits)) = (IpAddr::from_str(net.trim()), bits.trim().parse::<u32>()) else {
        return false;
    };
    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) if bits <= 32 => {
            let mask = u32::MAX.checked_shl(32 - bits).unwrap_or(0);
            u32::from(net) & mask == u32::from(ip) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) if bits <= 128 => {
            let mask = u128::MAX.checked_shl(128 - bits).unwrap_or(0);
            u128::from(net) & mask == u128::from(ip) & mask
        }
        _ => false,
    }
}

fn validate_ip_entry(entry: &str) -> Result<(), EngineError> {
    let valid = match entry.split_once('/') {
        Some((net, bits)) => match (IpAddr::from_str(net.trim()), bits.trim().parse::<u32>()) {
            (Ok(IpAddr::V4(_)), Ok(bits)) => bits <= 32,
            (Ok(IpAddr::V6(_)), Ok(bits)) => bits <= 128,
            _ => false,
        },
        None => IpAddr::from_str(entry.trim()).is_ok(),
    };
    if valid {
        Ok(())
    } else {
        Err(EngineError::Validation(format!("invalid allowed_ips entry '{entry}'")))
    }
}

fn normalize_method(method: &str) -> Result<String, EngineError> {
    let method = method.trim().to_uppercase();
    if METHODS.contains(&method.as_str()) {
        Ok(method)
    } else {
        Err(EngineError::Validation(format!("unsupported webhook method '{method}'")))
    }
}

fn validate_rate_limit(row: &WebhookRow) -> Result<(), EngineError> {
    let positive = |v: Option<i32>| v.map_or(true, |v| v > 0);
    if positive(row.rate_limit_max_calls) && positive(row.rate_limit_window_seconds) {
        Ok(())
    } else {
        Err(EngineError::Validation("rate limit values must be positive".into()))
    }
}

#[derive(Default)]
struct GatewayState {
    /// webhook id -> instants of accepted calls inside the current window
    windows: HashMap<Uuid, VecDeque<Instant>>,
}

#[derive(Clone)]
pub struct WebhookGateway {
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    state: Arc<Mutex<GatewayState>>,
    wait_timeout: Duration,
}

impl WebhookGateway {
    pub fn new(store: Arc<dyn Store>, dispatcher: Dispatcher, wait_timeout: Duration) -> Self {
        Self {
            store,
            dispatcher,
            state: Arc::default(),
            wait_timeout,
        }
    }

    // ------ CRUD ------

    pub async fn create(&self, workflow_id: Uuid, input: WebhookInput) -> Result<WebhookRow, EngineError> {
        let mut state = self.state.lock().await;
        self.store
            .get_workflow(workflow_id)
            .await
            .map_err(EngineError::lookup("workflow"))?;
        match self.store.get_webhook(workflow_id).await {
            Ok(_) => return Err(EngineError::AlreadyExists("webhook".into())),
            Err(DbError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let now = Utc::now();
        let mut row = WebhookRow {
            id: Uuid::new_v4(),
            workflow_id,
            path: Uuid::new_v4().simple().to_string(),
            method: "POST".into(),
            enabled: true,
            require_auth: false,
            secret_key: Some(generate_secret()),
            allowed_ips: Vec::new(),
            response_mode: ResponseMode::Immediate.as_str().into(),
            response_data: None,
            total_calls: 0,
            accepted_calls: 0,
            rejected_calls: 0,
            last_called_at: None,
            rate_limit_max_calls: None,
            rate_limit_window_seconds: None,
            created_at: now,
            updated_at: now,
        };
        apply_input(&mut row, input)?;

        self.store.upsert_webhook(&row).await.map_err(|err| match err {
            DbError::Conflict(_) => EngineError::AlreadyExists(format!("webhook path '{}'", row.path)),
            other => other.into(),
        })?;
        state.windows.remove(&row.id);
        info!(%workflow_id, path = %row.path, method = %row.method, "webhook created");
        Ok(row)
    }

    pub async fn get(&self, workflow_id: Uuid) -> Result<WebhookRow, EngineError> {
        self.store
            .get_webhook(workflow_id)
            .await
            .map_err(EngineError::lookup("webhook"))
    }

    pub async fn update(&self, workflow_id: Uuid, input: WebhookInput) -> Result<WebhookRow, EngineError> {
        let mut state = self.state.lock().await;
        let mut row = self.get(workflow_id).await?;
        let limits = (row.rate_limit_max_calls, row.rate_limit_window_seconds);
        apply_input(&mut row, input)?;
        row.updated_at = Utc::now();
        self.store.upsert_webhook(&row).await?;
        if limits != (row.rate_limit_max_calls, row.rate_limit_window_seconds) {
            state.windows.remove(&row.id);
        }
        info!(%workflow_id, enabled = row.enabled, "webhook updated");
        Ok(row)
    }

    pub async fn delete(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let row = self.get(workflow_id).await?;
        self.store.delete_webhook(workflow_id).await?;
        state.windows.remove(&row.id);
        info!(%workflow_id, "webhook deleted");
        Ok(())
    }

    // ------ inbound ------

    /// Check an inbound call and, when accepted, start the workflow.
    ///
    /// # Errors
    /// [`EngineError::Webhook`] for refused calls; counters are updated
    /// either way.
    #[instrument(skip_all, fields(path = %request.path, method = %request.method))]
    pub async fn handle(&self, request: InboundRequest) -> Result<WebhookResponse, EngineError> {
        let hook = {
            let mut state = self.state.lock().await;
            let mut hook = match self.store.get_webhook_by_path(&request.path).await {
                Ok(hook) => hook,
                Err(DbError::NotFound) => return Err(WebhookRejection::NotFound.into()),
                Err(err) => return Err(err.into()),
            };

            let verdict = self.admit(&mut state, &hook, &request).await?;
            hook.total_calls += 1;
            hook.last_called_at = Some(Utc::now());
            match verdict {
                Ok(()) => hook.accepted_calls += 1,
                Err(_) => hook.rejected_calls += 1,
            }
            self.store.upsert_webhook(&hook).await?;

            if let Err(rejection) = verdict {
                warn!(webhook_id = %hook.id, reason = %rejection, "webhook call rejected");
                return Err(rejection.into());
            }
            hook
        };

        let trigger_data = json!({
            "body": request.body,
            "headers": request.headers,
            "query": request.query,
            "method": request.method.to_uppercase(),
            "path": request.path,
        });
        let mut trigger = TriggerRequest::new(TriggerType::Webhook, trigger_data.clone(), request.body.clone());
        trigger.triggered_by = request.remote_ip.map(|ip| format!("webhook:{ip}"));
        let execution = self.dispatcher.dispatch(hook.workflow_id, trigger).await?;
        debug!(execution_id = %execution.id, "webhook call accepted");

        let mode = ResponseMode::from_str(&hook.response_mode).unwrap_or(ResponseMode::Immediate);
        let (status, execution) = match mode {
            ResponseMode::Immediate => (202, execution),
            ResponseMode::WaitForCompletion => {
                let finished = self
                    .dispatcher
                    .wait_for_completion(execution.id, self.wait_timeout)
                    .await?;
                let done = ExecutionStatus::from_str(&finished.status).is_ok_and(|s| s.is_terminal());
                (if done { 200 } else { 202 }, finished)
            }
        };

        Ok(WebhookResponse {
            status,
            body: response_body(hook.response_data.as_ref(), &execution, &trigger_data),
            execution_id: execution.id,
        })
    }

    /// Outer `Err` is a store failure; inner is the verdict.
    async fn admit(
        &self,
        state: &mut GatewayState,
        hook: &WebhookRow,
        request: &InboundRequest,
    ) -> Result<Result<(), WebhookRejection>, EngineError> {
        if !hook.enabled {
            return Ok(Err(WebhookRejection::Disabled));
        }
        if !hook.method.eq_ignore_ascii_case(&request.method) {
            return Ok(Err(WebhookRejection::MethodNotAllowed));
        }
        if !hook.allowed_ips.is_empty() {
            let allowed = request
                .remote_ip
                .is_some_and(|ip| hook.allowed_ips.iter().any(|entry| ip_allowed(entry, ip)));
            if !allowed {
                return Ok(Err(WebhookRejection::Forbidden));
            }
        }
        if hook.require_auth && !authenticated(hook, request) {
            return Ok(Err(WebhookRejection::Unauthorized));
        }

        if let Some(max_calls) = hook.rate_limit_max_calls.filter(|m| *m > 0) {
            let window = Duration::from_secs(u64::try_from(hook.rate_limit_window_seconds.unwrap_or(60).max(1)).unwrap_or(60));
            let now = Instant::now();
            let calls = state.windows.entry(hook.id).or_default();
            while calls.front().is_some_and(|t| now.duration_since(*t) >= window) {
                calls.pop_front();
            }
            if calls.len() >= usize::try_from(max_calls).unwrap_or(usize::MAX) {
                return Ok(Err(WebhookRejection::RateLimited));
            }
            calls.push_back(now);
        }

        let workflow = self
            .store
            .get_workflow(hook.workflow_id)
            .await
            .map_err(EngineError::lookup("workflow"))?;
        if workflow.status != WorkflowStatus::Active.as_str() {
            if let Some(calls) = state.windows.get_mut(&hook.id) {
                calls.pop_back();
            }
            return Ok(Err(WebhookRejection::WorkflowInactive));
        }
        Ok(Ok(()))
    }
}

fn authenticated(hook: &WebhookRow, request: &InboundRequest) -> bool {
    let Some(secret) = hook.secret_key.as_deref().filter(|s| !s.is_empty()) else {
        return false;
    };
    if let Some(signature) = request.headers.get(SIGNATURE_HEADER) {
        return signature_matches(secret, &request.raw_body, signature);
    }
    let presented = request.headers.get(SECRET_HEADER).map(String::as_str).or_else(|| {
        request
            .headers
            .get("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
    });
    presented.is_some_and(|p| constant_time_eq(p.trim().as_bytes(), secret.as_bytes()))
}

fn apply_input(row: &mut WebhookRow, input: WebhookInput) -> Result<(), EngineError> {
    if let Some(method) = input.method {
        row.method = normalize_method(&method)?;
    }
    if let Some(enabled) = input.enabled {
        row.enabled = enabled;
    }
    if let Some(require_auth) = input.require_auth {
        row.require_auth = require_auth;
    }
    if let Some(secret) = input.secret_key.filter(|s| !s.is_empty()) {
        row.secret_key = Some(secret);
    }
    if input.regenerate_secret {
        row.secret_key = Some(generate_secret());
    }
    if let Some(ips) = input.allowed_ips {
        for entry in &ips {
            validate_ip_entry(entry)?;
        }
        row.allowed_ips = ips;
    }
    if let Some(mode) = input.response_mode {
        let mode = ResponseMode::from_str(&mode).map_err(EngineError::Validation)?;
        row.response_mode = mode.as_str().into();
    }
    if let Some(data) = input.response_data {
        row.response_data = (!data.is_null()).then_some(data);
    }
    if input.rate_limit_max_calls.is_some() {
        row.rate_limit_max_calls = input.rate_limit_max_calls;
        if row.rate_limit_window_seconds.is_none() {
            row.rate_limit_window_seconds = Some(60);
        }
    }
    if input.rate_limit_window_seconds.is_some() {
        row.rate_limit_window_seconds = input.rate_limit_window_seconds;
    }
    validate_rate_limit(row)
}

/// `response_data` rendered against the call, or a default acknowledgement.
fn response_body(template: Option<&Value>, execution: &ExecutionRow, trigger: &Value) -> Value {
    let Some(template) = template else {
        return json!({
            "execution_id": execution.id,
            "human_id": execution.human_id,
            "status": execution.status,
            "output": execution.output_data,
        });
    };
    let scope = json!({
        "execution": {
            "id": execution.id,
            "human_id": execution.human_id,
            "status": execution.status,
        },
        "trigger": trigger,
        "input": trigger["body"],
        "output": execution.output_data,
    });
    template::render(template, &scope)
}

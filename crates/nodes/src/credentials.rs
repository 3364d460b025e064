//! Credential resolution for nodes that declare a `credentials_id`.
//!
//! The real secret store is an external collaborator; the engine only sees
//! this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::NodeError;

/// Resolves a `credentials_id` into a flat key/value map.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns `NodeError::Config` when the id is unknown.
    async fn resolve(&self, credentials_id: &str) -> Result<HashMap<String, String>, NodeError>;
}

/// Credentials held in process memory.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, credentials_id: impl Into<String>, values: HashMap<String, String>) {
        self.entries.write().await.insert(credentials_id.into(), values);
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn resolve(&self, credentials_id: &str) -> Result<HashMap<String, String>, NodeError> {
        self.entries
            .read()
            .await
            .get(credentials_id)
            .cloned()
            .ok_or_else(|| NodeError::Config(format!("unknown credentials '{credentials_id}'")))
    }
}

/// Reads credentials from environment variables.
///
/// `credentials_id = "slack-main"` collects every `FLOWFORGE_CRED_SLACK_MAIN_<KEY>`
/// variable into `{ "<key>": value }` (keys lower-cased).
pub struct EnvCredentialStore {
    prefix: String,
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self {
            prefix: "FLOWFORGE_CRED_".into(),
        }
    }
}

impl EnvCredentialStore {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn var_prefix(&self, credentials_id: &str) -> String {
        let id: String = credentials_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}_", self.prefix, id)
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn resolve(&self, credentials_id: &str) -> Result<HashMap<String, String>, NodeError> {
        let prefix = self.var_prefix(credentials_id);
        let values: HashMap<String, String> = std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_ascii_lowercase(), v))
            })
            .collect();

        if values.is_empty() {
            return Err(NodeError::Config(format!(
                "no environment credentials found for '{credentials_id}' ({prefix}*)"
            )));
        }
        Ok(values)
    }
}

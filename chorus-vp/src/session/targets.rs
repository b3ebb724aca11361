//! In-memory voice target registry

use crate::config::TargetConfig;
use crate::error::{Error, Result};
use crate::transport::{SessionTarget, TargetProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Targets seeded from config and updated by the gateway on voice server changes
#[derive(Default)]
pub struct StaticTargets {
    targets: RwLock<HashMap<String, SessionTarget>>,
}

impl StaticTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: Vec<TargetConfig>) -> Self {
        let targets = configs
            .into_iter()
            .map(|c| {
                let target = SessionTarget::from(c);
                (target.session_id.clone(), target)
            })
            .collect();
        Self {
            targets: RwLock::new(targets),
        }
    }

    /// Add or replace the target for `target.session_id`
    pub async fn insert(&self, target: SessionTarget) {
        debug!(session = %target.session_id, endpoint = %target.endpoint, "Voice target updated");
        self.targets.write().await.insert(target.session_id.clone(), target);
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionTarget> {
        self.targets.write().await.remove(session_id)
    }

    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }
}

#[async_trait]
impl TargetProvider for StaticTargets {
    async fn target_for(&self, session_id: &str) -> Result<SessionTarget> {
        self.targets
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no voice target for session {}", session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, endpoint: &str) -> SessionTarget {
        SessionTarget {
            session_id: id.to_string(),
            endpoint: endpoint.to_string(),
            ssrc: 1,
            token: None,
            payload_type: 120,
        }
    }

    #[tokio::test]
    async fn test_insert_replaces_and_lookup() {
        let targets = StaticTargets::new();
        assert!(targets.target_for("g1").await.is_err());

        targets.insert(target("g1", "127.0.0.1:1000")).await;
        targets.insert(target("g1", "127.0.0.1:2000")).await;
        assert_eq!(targets.len().await, 1);
        assert_eq!(targets.target_for("g1").await.unwrap().endpoint, "127.0.0.1:2000");

        targets.remove("g1").await;
        assert!(matches!(targets.target_for("g1").await, Err(Error::NotFound(_))));
    }
}

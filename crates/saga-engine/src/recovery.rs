//! Periodic sweep for sagas stuck in a non-terminal state.

use chrono::Utc;
use saga_store::{SagaInstance, SagaInstanceStore};

use crate::config::RecoveryConfig;
use crate::error::Result;

/// Scans the instance store for sagas stuck in a non-terminal state past
/// the staleness threshold.
///
/// The scanner only flags candidates — for operator alerting or a caller's
/// own resumption policy — and is the source of truth for crash recovery;
/// the orchestrator's in-process guard is not.
pub struct RecoveryScanner<I> {
    instances: I,
    config: RecoveryConfig,
}

impl<I: SagaInstanceStore> RecoveryScanner<I> {
    /// Creates a scanner over the given instance store.
    pub fn new(instances: I, config: RecoveryConfig) -> Self {
        Self { instances, config }
    }

    /// Runs one scan, returning the stale instances (stalest first).
    pub async fn scan_once(&self) -> Result<Vec<SagaInstance>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.staleness).unwrap_or(chrono::TimeDelta::MAX);
        let stale = self.instances.find_stale(cutoff).await?;

        for instance in &stale {
            tracing::warn!(
                saga_id = %instance.id,
                saga_type = %instance.saga_type,
                status = %instance.status,
                updated_at = %instance.updated_at,
                "stale saga flagged by recovery scan"
            );
        }
        metrics::counter!("recovery_stale_sagas").increment(stale.len() as u64);
        Ok(stale)
    }

    /// Runs scans forever on the configured interval. Intended to be
    /// spawned as its own task; scan errors are logged and the loop keeps
    /// going.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.scan_once().await {
                tracing::error!(error = %e, "recovery scan failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SagaContext;
    use saga_store::InMemorySagaStore;
    use std::time::Duration;

    #[tokio::test]
    async fn scan_flags_only_stale_non_terminal_instances() {
        let store = InMemorySagaStore::new();

        let mut stuck = SagaInstance::new("TestSaga", SagaContext::new("stuck"));
        stuck.updated_at = Utc::now() - chrono::Duration::hours(1);
        store.create(&stuck).await.unwrap();

        let mut old_done = SagaInstance::new("TestSaga", SagaContext::new("done"));
        old_done.complete();
        old_done.updated_at = Utc::now() - chrono::Duration::hours(1);
        store.create(&old_done).await.unwrap();

        let fresh = SagaInstance::new("TestSaga", SagaContext::new("fresh"));
        store.create(&fresh).await.unwrap();

        let scanner = RecoveryScanner::new(
            store,
            RecoveryConfig {
                staleness: Duration::from_secs(30 * 60),
                scan_interval: Duration::from_secs(60),
            },
        );

        let stale = scanner.scan_once().await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id.as_str(), "stuck");
    }
}

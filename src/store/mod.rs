//! Versioned, copy-on-write policy store
//!
//! Readers load an `Arc` snapshot without locking; writers validate, persist
//! and only then publish a new snapshot, so a failed write changes nothing.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::models::{AdvancedOptions, LoadBalancingPolicy, RotationPolicy, SubscriberConfig};
use crate::repository::PolicyRepository;

type Snapshot = HashMap<String, Arc<SubscriberConfig>>;

pub struct ConfigurationStore {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
    repo: Arc<dyn PolicyRepository>,
}

impl ConfigurationStore {
    /// Hydrate the store from persisted policies
    pub async fn load(repo: Arc<dyn PolicyRepository>) -> Result<Self> {
        let configs = repo.load_configs().await?;
        let snapshot: Snapshot = configs
            .into_iter()
            .map(|c| (c.subscriber_id.clone(), Arc::new(c)))
            .collect();

        info!(subscribers = snapshot.len(), "Loaded subscriber policies");

        Ok(Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            write_lock: Mutex::new(()),
            repo,
        })
    }

    pub fn get(&self, subscriber_id: &str) -> Option<Arc<SubscriberConfig>> {
        self.snapshot.load().get(subscriber_id).cloned()
    }

    /// Consistent view of every subscriber at one version
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Subscribers with a rotation policy, ordered by id
    pub fn rotating_subscribers(&self) -> Vec<Arc<SubscriberConfig>> {
        let snapshot = self.snapshot.load();
        let mut found: Vec<_> = snapshot
            .values()
            .filter(|c| c.rotation.is_some())
            .cloned()
            .collect();
        found.sort_by(|a, b| a.subscriber_id.cmp(&b.subscriber_id));
        found
    }

    pub async fn set_rotation(
        &self,
        subscriber_id: &str,
        mut policy: RotationPolicy,
    ) -> Result<Arc<SubscriberConfig>> {
        policy.subscriber_id = subscriber_id.to_string();
        policy.validate()?;

        self.update(subscriber_id, move |config| {
            policy.version = config.version;
            config.rotation = Some(policy);
        })
        .await
    }

    pub async fn set_load_balancing(
        &self,
        subscriber_id: &str,
        mut policy: LoadBalancingPolicy,
    ) -> Result<Arc<SubscriberConfig>> {
        policy.subscriber_id = subscriber_id.to_string();
        policy.validate()?;

        self.update(subscriber_id, move |config| {
            policy.version = config.version;
            config.load_balancing = Some(policy);
        })
        .await
    }

    pub async fn set_options(
        &self,
        subscriber_id: &str,
        options: AdvancedOptions,
    ) -> Result<Arc<SubscriberConfig>> {
        options.validate()?;

        self.update(subscriber_id, move |config| config.options = options)
            .await
    }

    pub async fn set_health_monitoring(
        &self,
        subscriber_id: &str,
        enabled: bool,
    ) -> Result<Arc<SubscriberConfig>> {
        self.update(subscriber_id, move |config| {
            config.health_monitoring = enabled
        })
        .await
    }

    /// Apply an already-validated change as one new version
    ///
    /// `apply` sees the config with its version already bumped.
    async fn update<F>(&self, subscriber_id: &str, apply: F) -> Result<Arc<SubscriberConfig>>
    where
        F: FnOnce(&mut SubscriberConfig),
    {
        if subscriber_id.trim().is_empty() {
            return Err(FleetError::Configuration("subscriber id is required".into()));
        }

        let _guard = self.write_lock.lock().await;

        let current = self.snapshot.load_full();
        let mut next = current
            .get(subscriber_id)
            .map(|c| c.as_ref().clone())
            .unwrap_or_else(|| SubscriberConfig::new(subscriber_id));
        next.version += 1;
        apply(&mut next);

        self.repo.save_config(&next).await?;

        let next = Arc::new(next);
        let mut map = current.as_ref().clone();
        map.insert(subscriber_id.to_string(), next.clone());
        self.snapshot.store(Arc::new(map));

        debug!(subscriber = %subscriber_id, version = next.version, "Published policy snapshot");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Algorithm, TriggerType};
    use crate::repository::MemoryStore;
    use async_trait::async_trait;

    struct FailingPolicies;

    #[async_trait]
    impl PolicyRepository for FailingPolicies {
        async fn save_config(&self, _config: &SubscriberConfig) -> Result<()> {
            Err(FleetError::DatabaseConnection("store offline".into()))
        }

        async fn load_configs(&self) -> Result<Vec<SubscriberConfig>> {
            Ok(Vec::new())
        }
    }

    async fn store() -> ConfigurationStore {
        ConfigurationStore::load(Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_writes_bump_version_and_keep_other_policies() {
        let store = store().await;

        let rotation = RotationPolicy {
            trigger: TriggerType::Hybrid,
            ..RotationPolicy::default()
        };
        let first = store.set_rotation("sub-1", rotation).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.rotation.as_ref().unwrap().subscriber_id, "sub-1");
        assert_eq!(first.rotation.as_ref().unwrap().version, 1);

        let lb = LoadBalancingPolicy {
            algorithm: Algorithm::LeastConnections,
            ..LoadBalancingPolicy::default()
        };
        let second = store.set_load_balancing("sub-1", lb).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.rotation.as_ref().unwrap().trigger, TriggerType::Hybrid);
        assert_eq!(
            second.load_balancing.as_ref().unwrap().algorithm,
            Algorithm::LeastConnections
        );

        assert_eq!(store.rotating_subscribers().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_policy_is_rejected_without_change() {
        let store = store().await;
        store
            .set_rotation("sub-1", RotationPolicy::default())
            .await
            .unwrap();

        let bad = RotationPolicy {
            cooldown_secs: 0,
            ..RotationPolicy::default()
        };
        let err = store.set_rotation("sub-1", bad).await.unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));

        let current = store.get("sub-1").unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.rotation.as_ref().unwrap().cooldown_secs, 60);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_snapshot_untouched() {
        let store = ConfigurationStore::load(Arc::new(FailingPolicies))
            .await
            .unwrap();

        let result = store
            .set_options("sub-1", AdvancedOptions::default())
            .await;
        assert!(result.is_err());
        assert!(store.get("sub-1").is_none());
    }

    #[tokio::test]
    async fn test_readers_keep_their_snapshot() {
        let store = store().await;
        store.set_health_monitoring("sub-1", true).await.unwrap();

        let before = store.snapshot();
        store.set_health_monitoring("sub-1", false).await.unwrap();

        assert!(before["sub-1"].health_monitoring);
        assert!(!store.get("sub-1").unwrap().health_monitoring);
    }

    #[tokio::test]
    async fn test_reload_from_repository() {
        let repo = Arc::new(MemoryStore::new());
        {
            let store = ConfigurationStore::load(repo.clone()).await.unwrap();
            store
                .set_rotation("sub-9", RotationPolicy::default())
                .await
                .unwrap();
        }

        let reloaded = ConfigurationStore::load(repo).await.unwrap();
        assert_eq!(reloaded.get("sub-9").unwrap().version, 1);
    }
}

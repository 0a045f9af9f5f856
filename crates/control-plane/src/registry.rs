//! Cluster identity lifecycle: register, confirm, authenticate, revoke.
//!
//! A cluster starts in bootstrap phase holding a registration token and a
//! bootstrap access key. Confirmation swaps the bootstrap key for a rotated
//! one and drops the token; that transition happens once. Revocation is a
//! terminal soft delete.

use std::sync::Arc;

use control_common::constants::{ACCESS_KEY_LENGTH, event_kinds, status};
use control_common::error::Result;
use control_common::{
    Cluster, ClusterConfirmResponse, ClusterEventInput, ClusterIdentity, ClusterInput,
    ClusterRegResponse, ClusterSnapshot, ControlPlaneError,
};

use crate::access_key;
use crate::broadcast::{EventBroadcaster, Scope};
use crate::identity::TokenIssuer;
use crate::store::{ClusterFilter, ClusterPatch, ClusterStore};

/// Result of a confirmation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Key rotated; `new_key` must be kept by the agent
    Confirmed { cluster_id: String, new_key: String },
    /// Wrong key, already confirmed, or removed. Nothing was changed.
    Mismatched,
}

impl From<ConfirmOutcome> for ClusterConfirmResponse {
    fn from(outcome: ConfirmOutcome) -> Self {
        match outcome {
            ConfirmOutcome::Confirmed {
                cluster_id,
                new_key,
            } => Self {
                is_cluster_confirmed: true,
                new_cluster_key: Some(new_key),
                cluster_id: Some(cluster_id),
            },
            ConfirmOutcome::Mismatched => Self {
                is_cluster_confirmed: false,
                new_cluster_key: None,
                cluster_id: None,
            },
        }
    }
}

pub struct ClusterRegistry {
    store: Arc<dyn ClusterStore>,
    tokens: Arc<dyn TokenIssuer>,
    broadcaster: Arc<EventBroadcaster>,
}

impl ClusterRegistry {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        tokens: Arc<dyn TokenIssuer>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            store,
            tokens,
            broadcaster,
        }
    }

    /// Create a cluster in bootstrap phase.
    ///
    /// The token is issued before anything is written; if the write fails the
    /// unused token and key are simply discarded.
    pub async fn register(&self, input: ClusterInput) -> Result<ClusterRegResponse> {
        let cluster_id = uuid::Uuid::new_v4().to_string();
        let token = self.tokens.issue_registration_token(&cluster_id)?;
        let access_key = access_key::generate(ACCESS_KEY_LENGTH);

        let cluster = Cluster::bootstrap(cluster_id, input, access_key, token.clone());
        self.store.insert(&cluster).await?;

        tracing::info!(
            cluster_id = %cluster.cluster_id,
            project_id = %cluster.project_id,
            "New cluster registered"
        );

        Ok(ClusterRegResponse {
            cluster_id: cluster.cluster_id,
            token,
            cluster_name: cluster.cluster_name,
        })
    }

    /// Exchange the bootstrap key for a rotated one
    pub async fn confirm(&self, identity: &ClusterIdentity) -> Result<ConfirmOutcome> {
        let mut cluster = self.store.get(&identity.cluster_id).await?;

        if cluster.is_removed
            || !cluster.is_bootstrap()
            || !access_key::equals(&cluster.access_key, &identity.access_key)
        {
            tracing::debug!(cluster_id = %identity.cluster_id, "Confirmation rejected");
            return Ok(ConfirmOutcome::Mismatched);
        }

        let new_key = access_key::generate(ACCESS_KEY_LENGTH);
        let patch = ClusterPatch::confirm(new_key.clone(), chrono::Utc::now().timestamp());
        // Guarding on the presented key makes concurrent confirms race safely
        let filter = ClusterFilter::by_id(&identity.cluster_id)
            .with_access_key(&identity.access_key)
            .not_removed();

        if self.store.update(&filter, &patch).await? == 0 {
            tracing::debug!(cluster_id = %identity.cluster_id, "Confirmation lost to a concurrent update");
            return Ok(ConfirmOutcome::Mismatched);
        }
        patch.apply(&mut cluster);

        tracing::info!(
            cluster_id = %cluster.cluster_id,
            project_id = %cluster.project_id,
            "Cluster confirmed"
        );

        let scope = Scope::Project(cluster.project_id.clone());
        self.broadcaster
            .publish(
                event_kinds::CLUSTER_REGISTRATION,
                "New Cluster",
                "New Cluster registration",
                cluster.snapshot(),
                scope,
            )
            .await;

        Ok(ConfirmOutcome::Confirmed {
            cluster_id: cluster.cluster_id,
            new_key,
        })
    }

    /// Existence check
    pub async fn verify(&self, cluster_id: &str) -> Result<Cluster> {
        self.store.get(cluster_id).await
    }

    /// Existence plus key check for agent-originated messages. Only confirmed,
    /// non-removed clusters holding their rotated key pass.
    pub async fn authenticate(&self, identity: &ClusterIdentity) -> Result<Cluster> {
        let cluster = self.verify(&identity.cluster_id).await?;

        if cluster.is_removed
            || !cluster.is_registered
            || !access_key::equals(&cluster.access_key, &identity.access_key)
        {
            tracing::warn!(cluster_id = %identity.cluster_id, "Cluster authentication failed");
            return Err(ControlPlaneError::AuthMismatch(format!(
                "cluster {}",
                identity.cluster_id
            )));
        }

        Ok(cluster)
    }

    /// Relay an agent-reported lifecycle event to the cluster's project
    pub async fn publish_event(&self, input: &ClusterEventInput) -> Result<&'static str> {
        let identity = ClusterIdentity {
            cluster_id: input.cluster_id.clone(),
            access_key: input.access_key.clone(),
        };
        let cluster = self.authenticate(&identity).await?;

        tracing::info!(
            cluster_id = %cluster.cluster_id,
            project_id = %cluster.project_id,
            event_name = %input.event_name,
            "Cluster event"
        );

        let scope = Scope::Project(cluster.project_id.clone());
        self.broadcaster
            .publish(
                event_kinds::CLUSTER_EVENT,
                &input.event_name,
                &input.description,
                cluster.snapshot(),
                scope,
            )
            .await;

        Ok(status::EVENT_PUBLISHED)
    }

    /// Soft delete
    pub async fn revoke(&self, cluster_id: &str) -> Result<()> {
        let patch = ClusterPatch::remove(chrono::Utc::now().timestamp());
        if self.store.update(&ClusterFilter::by_id(cluster_id), &patch).await? == 0 {
            return Err(ControlPlaneError::NotFound(format!("cluster {}", cluster_id)));
        }

        tracing::info!(cluster_id = %cluster_id, "Cluster revoked");
        Ok(())
    }

    /// Map a registration token back to its still-unconfirmed cluster
    pub async fn resolve_registration_token(&self, token: &str) -> Result<ClusterSnapshot> {
        let claims = self.tokens.validate_registration_token(token)?;
        let cluster = self.verify(&claims.cluster_id).await?;

        let current = cluster
            .token
            .as_deref()
            .is_some_and(|stored| access_key::equals(stored, token));
        if cluster.is_removed || !cluster.is_bootstrap() || !current {
            return Err(ControlPlaneError::AuthMismatch(format!(
                "registration token for cluster {} is no longer valid",
                cluster.cluster_id
            )));
        }

        tracing::debug!(
            cluster_id = %cluster.cluster_id,
            expiry = claims.expiry,
            "Registration token resolved"
        );
        Ok(cluster.snapshot())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::TokenConfig;
    use crate::identity::RegistrationTokenIssuer;
    use crate::store::MemoryClusterStore;
    use async_trait::async_trait;

    pub(crate) fn cluster_input(name: &str, project_id: &str) -> ClusterInput {
        ClusterInput {
            cluster_name: name.to_string(),
            description: Some("test cluster".to_string()),
            project_id: project_id.to_string(),
            cluster_type: "external".to_string(),
            platform_name: "GKE".to_string(),
            agent_namespace: Some("litmus".to_string()),
            serviceaccount: Some("litmus".to_string()),
            agent_scope: "cluster".to_string(),
            agent_ns_exists: Some(false),
            agent_sa_exists: Some(false),
        }
    }

    pub(crate) fn registry_with(
        store: Arc<dyn ClusterStore>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> ClusterRegistry {
        let tokens = RegistrationTokenIssuer::new(&TokenConfig::default()).unwrap();
        ClusterRegistry::new(store, Arc::new(tokens), broadcaster)
    }

    fn registry() -> (ClusterRegistry, Arc<MemoryClusterStore>, Arc<EventBroadcaster>) {
        let store = Arc::new(MemoryClusterStore::new());
        let broadcaster = Arc::new(EventBroadcaster::new(16));
        (registry_with(store.clone(), broadcaster.clone()), store, broadcaster)
    }

    /// Register and confirm, returning the cluster ID and rotated key
    pub(crate) async fn confirmed_cluster(
        registry: &ClusterRegistry,
        store: &dyn ClusterStore,
        project_id: &str,
    ) -> ClusterIdentity {
        let reg = registry.register(cluster_input("staging-eu", project_id)).await.unwrap();
        let bootstrap = store.get(&reg.cluster_id).await.unwrap().access_key;
        let outcome = registry
            .confirm(&ClusterIdentity {
                cluster_id: reg.cluster_id.clone(),
                access_key: bootstrap,
            })
            .await
            .unwrap();

        match outcome {
            ConfirmOutcome::Confirmed {
                cluster_id,
                new_key,
            } => ClusterIdentity {
                cluster_id,
                access_key: new_key,
            },
            ConfirmOutcome::Mismatched => panic!("confirmation failed"),
        }
    }

    struct FailingIssuer;

    impl TokenIssuer for FailingIssuer {
        fn issue_registration_token(&self, _cluster_id: &str) -> Result<String> {
            Err(ControlPlaneError::IdentityIssue("signer offline".into()))
        }

        fn validate_registration_token(
            &self,
            _token: &str,
        ) -> Result<crate::identity::RegistrationClaims> {
            Err(ControlPlaneError::IdentityIssue("signer offline".into()))
        }
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl ClusterStore for ReadOnlyStore {
        async fn insert(&self, _cluster: &Cluster) -> Result<()> {
            Err(ControlPlaneError::Persistence("read-only replica".into()))
        }

        async fn get(&self, cluster_id: &str) -> Result<Cluster> {
            Err(ControlPlaneError::NotFound(cluster_id.to_string()))
        }

        async fn update(&self, _filter: &ClusterFilter, _patch: &ClusterPatch) -> Result<u64> {
            Err(ControlPlaneError::Persistence("read-only replica".into()))
        }
    }

    #[tokio::test]
    async fn test_register_creates_bootstrap_cluster() {
        let (registry, store, _) = registry();
        let a = registry.register(cluster_input("a", "p1")).await.unwrap();
        let b = registry.register(cluster_input("b", "p1")).await.unwrap();

        assert_ne!(a.cluster_id, b.cluster_id);
        assert_eq!(a.cluster_name, "a");

        let stored_a = store.get(&a.cluster_id).await.unwrap();
        let stored_b = store.get(&b.cluster_id).await.unwrap();
        assert_ne!(stored_a.access_key, stored_b.access_key);
        assert_eq!(stored_a.access_key.len(), ACCESS_KEY_LENGTH);
        assert_eq!(stored_a.token.as_deref(), Some(a.token.as_str()));
        assert!(!stored_a.is_registered && !stored_a.is_cluster_confirmed && !stored_a.is_removed);
    }

    #[tokio::test]
    async fn test_register_failures_leave_nothing() {
        let broadcaster = Arc::new(EventBroadcaster::new(4));
        let store = Arc::new(MemoryClusterStore::new());
        let registry = ClusterRegistry::new(store, Arc::new(FailingIssuer), broadcaster.clone());
        assert!(matches!(
            registry.register(cluster_input("a", "p1")).await,
            Err(ControlPlaneError::IdentityIssue(_))
        ));

        let registry = registry_with(Arc::new(ReadOnlyStore), broadcaster);
        assert!(matches!(
            registry.register(cluster_input("a", "p1")).await,
            Err(ControlPlaneError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn test_confirm_wrong_key_mutates_nothing() {
        let (registry, store, broadcaster) = registry();
        let mut events = broadcaster.subscribe(Scope::Project("p1".into())).await;
        let reg = registry.register(cluster_input("a", "p1")).await.unwrap();
        let before = store.get(&reg.cluster_id).await.unwrap();

        let identity = ClusterIdentity {
            cluster_id: reg.cluster_id.clone(),
            access_key: "wrong".into(),
        };
        for _ in 0..3 {
            let outcome = registry.confirm(&identity).await.unwrap();
            assert_eq!(outcome, ConfirmOutcome::Mismatched);
            assert!(!ClusterConfirmResponse::from(outcome).is_cluster_confirmed);
        }

        assert_eq!(store.get(&reg.cluster_id).await.unwrap(), before);
        assert!(events.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_confirm_rotates_once() {
        let (registry, store, broadcaster) = registry();
        let mut events = broadcaster.subscribe(Scope::Project("p1".into())).await;
        let reg = registry.register(cluster_input("a", "p1")).await.unwrap();
        let k0 = store.get(&reg.cluster_id).await.unwrap().access_key;
        let identity = ClusterIdentity {
            cluster_id: reg.cluster_id.clone(),
            access_key: k0.clone(),
        };

        let response = ClusterConfirmResponse::from(registry.confirm(&identity).await.unwrap());
        assert!(response.is_cluster_confirmed);
        assert_eq!(response.cluster_id.as_deref(), Some(reg.cluster_id.as_str()));
        let k1 = response.new_cluster_key.unwrap();
        assert_ne!(k0, k1);

        let stored = store.get(&reg.cluster_id).await.unwrap();
        assert_eq!(stored.access_key, k1);
        assert!(stored.token.is_none());
        assert!(stored.is_registered && stored.is_cluster_confirmed);

        let event = events.receiver.try_recv().unwrap();
        assert_eq!(event.event_type, event_kinds::CLUSTER_REGISTRATION);
        assert!(event.cluster.is_cluster_confirmed);
        assert!(!serde_json::to_string(&event).unwrap().contains(&k1));

        // The bootstrap key no longer works
        assert_eq!(registry.confirm(&identity).await.unwrap(), ConfirmOutcome::Mismatched);
        assert_eq!(store.get(&reg.cluster_id).await.unwrap().access_key, k1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirms_rotate_once() {
        let (registry, store, _) = registry();
        let registry = Arc::new(registry);
        let reg = registry.register(cluster_input("a", "p1")).await.unwrap();
        let k0 = store.get(&reg.cluster_id).await.unwrap().access_key;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let identity = ClusterIdentity {
                    cluster_id: reg.cluster_id.clone(),
                    access_key: k0.clone(),
                };
                tokio::spawn(async move { registry.confirm(&identity).await.unwrap() })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            if let ConfirmOutcome::Confirmed { new_key, .. } = handle.await.unwrap() {
                winners.push(new_key);
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = store.get(&reg.cluster_id).await.unwrap();
        assert_eq!(stored.access_key, winners[0]);
        assert!(stored.is_cluster_confirmed && stored.token.is_none());
    }

    #[tokio::test]
    async fn test_confirm_unknown_cluster() {
        let (registry, _, _) = registry();
        let identity = ClusterIdentity {
            cluster_id: "missing".into(),
            access_key: "k".into(),
        };
        assert!(matches!(
            registry.confirm(&identity).await,
            Err(ControlPlaneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_event_requires_rotated_key() {
        let (registry, store, broadcaster) = registry();
        let reg = registry.register(cluster_input("a", "p1")).await.unwrap();
        let k0 = store.get(&reg.cluster_id).await.unwrap().access_key;

        let event = |key: &str| ClusterEventInput {
            cluster_id: reg.cluster_id.clone(),
            access_key: key.to_string(),
            event_name: "agent-restart".into(),
            description: "subscriber restarted".into(),
        };

        // Unconfirmed clusters cannot publish
        assert!(matches!(
            registry.publish_event(&event(&k0)).await,
            Err(ControlPlaneError::AuthMismatch(_))
        ));

        let k1 = match registry
            .confirm(&ClusterIdentity {
                cluster_id: reg.cluster_id.clone(),
                access_key: k0.clone(),
            })
            .await
            .unwrap()
        {
            ConfirmOutcome::Confirmed { new_key, .. } => new_key,
            ConfirmOutcome::Mismatched => panic!("confirmation failed"),
        };

        let mut events = broadcaster.subscribe(Scope::Project("p1".into())).await;
        assert_eq!(registry.publish_event(&event(&k1)).await.unwrap(), status::EVENT_PUBLISHED);
        let published = events.receiver.try_recv().unwrap();
        assert_eq!(published.event_type, event_kinds::CLUSTER_EVENT);
        assert_eq!(published.event_name, "agent-restart");

        assert!(matches!(
            registry.publish_event(&event(&k0)).await,
            Err(ControlPlaneError::AuthMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_is_terminal() {
        let (registry, store, _) = registry();
        let identity = confirmed_cluster(&registry, store.as_ref(), "p1").await;

        registry.revoke(&identity.cluster_id).await.unwrap();
        let stored = store.get(&identity.cluster_id).await.unwrap();
        assert!(stored.is_removed);

        assert!(matches!(
            registry.authenticate(&identity).await,
            Err(ControlPlaneError::AuthMismatch(_))
        ));
        assert!(matches!(
            registry.revoke("missing").await,
            Err(ControlPlaneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_removed_bootstrap_cluster_cannot_confirm() {
        let (registry, store, _) = registry();
        let reg = registry.register(cluster_input("a", "p1")).await.unwrap();
        let k0 = store.get(&reg.cluster_id).await.unwrap().access_key;
        registry.revoke(&reg.cluster_id).await.unwrap();

        let outcome = registry
            .confirm(&ClusterIdentity {
                cluster_id: reg.cluster_id.clone(),
                access_key: k0.clone(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Mismatched);
        assert_eq!(store.get(&reg.cluster_id).await.unwrap().access_key, k0);
    }

    #[tokio::test]
    async fn test_resolve_registration_token() {
        let (registry, store, _) = registry();
        let reg = registry.register(cluster_input("a", "p1")).await.unwrap();

        let snapshot = registry.resolve_registration_token(&reg.token).await.unwrap();
        assert_eq!(snapshot.cluster_id, reg.cluster_id);

        let k0 = store.get(&reg.cluster_id).await.unwrap().access_key;
        registry
            .confirm(&ClusterIdentity {
                cluster_id: reg.cluster_id.clone(),
                access_key: k0,
            })
            .await
            .unwrap();

        assert!(matches!(
            registry.resolve_registration_token(&reg.token).await,
            Err(ControlPlaneError::AuthMismatch(_))
        ));
    }
}

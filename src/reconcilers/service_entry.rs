// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::controllers::ResourceHandler;
use crate::error::Result;
use crate::lazy::Recompute;
use crate::model::store::ServiceEntryHosts;
use crate::model::StateStore;
use crate::types::ServiceEntry;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;

/// Records the external hosts advertised by ServiceEntries
pub struct ServiceEntryReconciler {
    store: Arc<StateStore>,
    recompute: Arc<dyn Recompute>,
}

impl ServiceEntryReconciler {
    pub fn new(store: Arc<StateStore>, recompute: Arc<dyn Recompute>) -> Self {
        Self { store, recompute }
    }
}

#[async_trait]
impl ResourceHandler<ServiceEntry> for ServiceEntryReconciler {
    fn needs_update(&self, old: &ServiceEntry, new: &ServiceEntry) -> bool {
        old.spec.hosts != new.spec.hosts
    }

    async fn sync(&self, key: &str, entry: Arc<ServiceEntry>) -> Result<()> {
        let hosts = ServiceEntryHosts {
            namespace: entry.namespace().unwrap_or_default(),
            hosts: entry.spec.hosts.iter().cloned().collect(),
        };
        if self.store.update_service_entry(key, hosts) {
            self.recompute.all();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.store.delete_service_entry(key) {
            self.recompute.all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingRecompute;
    use crate::types::ServiceEntrySpec;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_hosts_recorded_per_entry() {
        let store = Arc::new(StateStore::new("cluster.local"));
        let recompute = Arc::new(RecordingRecompute::default());
        let reconciler = ServiceEntryReconciler::new(store.clone(), recompute.clone());
        let mut entry = ServiceEntry::new(
            "payments",
            ServiceEntrySpec {
                hosts: vec!["api.payments.example".to_string()],
                ..Default::default()
            },
        );
        entry.metadata.namespace = Some("ns3".to_string());
        let entry = Arc::new(entry);

        reconciler.sync("ns3/payments", entry.clone()).await.unwrap();
        reconciler.sync("ns3/payments", entry).await.unwrap();
        assert_eq!(
            store.service_entry_hosts("istio-system"),
            BTreeSet::from([("ns3".to_string(), "api.payments.example".to_string())])
        );
        assert_eq!(recompute.all_count(), 1);

        reconciler.delete("ns3/payments").await.unwrap();
        assert!(store.service_entry_hosts("istio-system").is_empty());
        assert_eq!(recompute.all_count(), 2);
    }
}

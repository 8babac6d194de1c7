// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Remote cluster client creation from credential secrets

use crate::error::{LazyError, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::{config::KubeConfigOptions, Client, ResourceExt};
use tracing::{debug, instrument};

/// Extract the credential blob of a cluster secret.
///
/// The first data key (in key order) is used; its name is not significant.
pub fn credential_from_secret(secret: &Secret) -> Result<String> {
    let name = secret.name_any();

    let Some((key, value)) = secret.data.as_ref().and_then(|d| d.iter().next()) else {
        return Err(LazyError::Credential(format!(
            "Secret {} has no data",
            name
        )));
    };

    debug!("Using key '{}' of secret {} as cluster credential", key, name);

    String::from_utf8(value.0.clone()).map_err(|e| {
        LazyError::Credential(format!(
            "Failed to decode credential in secret {}: {}",
            name, e
        ))
    })
}

/// Create a Kubernetes client from a kubeconfig string
#[instrument(skip(kubeconfig))]
pub async fn create_client_from_kubeconfig(kubeconfig: &str) -> Result<Client> {
    use kube::config::Kubeconfig;

    let kubeconfig_parsed: Kubeconfig = serde_yaml::from_str(kubeconfig)
        .map_err(|e| LazyError::KubeconfigError(format!("Failed to parse kubeconfig: {}", e)))?;

    let client_config =
        kube::Config::from_custom_kubeconfig(kubeconfig_parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| LazyError::KubeconfigError(format!("Failed to create config: {}", e)))?;

    Client::try_from(client_config)
        .map_err(|e| LazyError::KubeconfigError(format!("Failed to create client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn make_secret(data: Option<BTreeMap<String, ByteString>>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("cluster-east".to_string()),
                namespace: Some("istio-system".to_string()),
                ..Default::default()
            },
            data,
            ..Default::default()
        }
    }

    #[test]
    fn test_credential_uses_first_key() {
        let secret = make_secret(Some(BTreeMap::from([
            ("b-config".to_string(), ByteString(b"second".to_vec())),
            ("a-config".to_string(), ByteString(b"first".to_vec())),
        ])));

        assert_eq!(credential_from_secret(&secret).unwrap(), "first");
    }

    #[test]
    fn test_credential_missing_data() {
        let secret = make_secret(None);
        assert!(matches!(
            credential_from_secret(&secret),
            Err(LazyError::Credential(_))
        ));
    }

    #[test]
    fn test_credential_not_utf8() {
        let secret = make_secret(Some(BTreeMap::from([(
            "config".to_string(),
            ByteString(vec![0xff, 0xfe]),
        )])));
        assert!(matches!(
            credential_from_secret(&secret),
            Err(LazyError::Credential(_))
        ));
    }

    #[tokio::test]
    async fn test_unparseable_kubeconfig() {
        let result = create_client_from_kubeconfig("clusters: [this is not: valid").await;
        assert!(matches!(result, Err(LazyError::KubeconfigError(_))));
    }
}

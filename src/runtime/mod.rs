//! Pod metadata fetch
//!
//! Thin glue over the orchestrator API. Its whole contract with the core
//! is producing the customization map: pod labels merged with annotations,
//! plus the resolved controller name under `cni.anchor.org/controller`.

use std::collections::HashMap;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::allocator::CONTROLLER_KEY;
use crate::cni::config::KubernetesConf;
use crate::error::RuntimeError;

/// Build a kube client from the net conf's kubeconfig path
///
/// Falls back to the ambient configuration (in-cluster service account or
/// `KUBECONFIG`) when no path is configured. API root and credential
/// overrides ride on the kubeconfig file.
pub async fn new_client(kubernetes: Option<&KubernetesConf>) -> Result<Client, RuntimeError> {
    let config = match kubernetes.and_then(|k| k.kubeconfig.as_deref()) {
        Some(path) => {
            let kubeconfig =
                Kubeconfig::read_from(path).map_err(|e| RuntimeError::Client(e.to_string()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| RuntimeError::Client(e.to_string()))?
        }
        None => Config::infer()
            .await
            .map_err(|e| RuntimeError::Client(e.to_string()))?,
    };
    Client::try_from(config).map_err(|e| RuntimeError::Client(e.to_string()))
}

/// Fetch the pod and build the customization map
///
/// Labels are merged first, annotations second, so an annotation wins over
/// a label of the same key. A resolved controller name is added under
/// `cni.anchor.org/controller`; a pod without a controller is not an error.
pub async fn pod_customizations(
    client: &Client,
    pod_name: &str,
    namespace: &str,
) -> Result<HashMap<String, String>, RuntimeError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod = pods
        .get(pod_name)
        .await
        .map_err(|e| RuntimeError::PodUnavailable {
            namespace: namespace.to_string(),
            pod: pod_name.to_string(),
            reason: e.to_string(),
        })?;

    let mut customized = HashMap::new();
    if let Some(labels) = &pod.metadata.labels {
        customized.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if let Some(annotations) = &pod.metadata.annotations {
        customized.extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    if let Some(controller) = controller_name(client, &pod, namespace).await {
        debug!("pod {namespace}/{pod_name} controlled by {controller}");
        customized.insert(CONTROLLER_KEY.to_string(), controller);
    }

    Ok(customized)
}

/// Resolve the name of the pod's controlling owner
///
/// A ReplicaSet owner is chased one level up so a Deployment-managed pod
/// reports the Deployment, not the generated ReplicaSet.
async fn controller_name(client: &Client, pod: &Pod, namespace: &str) -> Option<String> {
    let owner = pod
        .metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))?;

    if owner.kind.eq_ignore_ascii_case("replicaset") {
        let replicasets: Api<ReplicaSet> = Api::namespaced(client.clone(), namespace);
        if let Ok(rs) = replicasets.get(&owner.name).await {
            if let Some(rs_owner) = rs
                .metadata
                .owner_references
                .as_ref()
                .and_then(|refs| refs.iter().find(|r| r.controller == Some(true)))
            {
                return Some(rs_owner.name.clone());
            }
        }
        return Some(owner.name.clone());
    }

    Some(owner.name.clone())
}

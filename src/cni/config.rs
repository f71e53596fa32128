//! Net conf loading
//!
//! The runtime hands the network configuration as a JSON blob on stdin.
//! Only the `ipam` section matters here; the rest of the net conf is
//! echoed back through the result version.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::types::CniRoute;

/// Top-level network config as read from stdin
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NetConf {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,

    #[serde(rename = "type", default)]
    pub plugin_type: String,

    #[serde(default)]
    pub master: Option<String>,

    pub ipam: Option<IpamConf>,
}

/// The IPAM section of the net conf
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IpamConf {
    #[serde(rename = "type", default)]
    pub plugin_type: String,

    /// Comma-separated etcd endpoints; required
    #[serde(default)]
    pub etcd_endpoints: String,

    /// Client TLS material for the etcd cluster
    #[serde(default)]
    pub etcd_cert_file: Option<String>,
    #[serde(default)]
    pub etcd_key_file: Option<String>,
    #[serde(default)]
    pub etcd_ca_cert_file: Option<String>,

    /// Service cluster IP range routed through a node IP
    #[serde(default)]
    pub service_ipnet: Option<String>,

    /// This host's addresses, candidates for the service route next hop
    #[serde(default)]
    pub node_ips: Vec<String>,

    /// Kubernetes client settings for the pod metadata fetch
    #[serde(default)]
    pub kubernetes: Option<KubernetesConf>,

    /// Auth policy settings; the kubeconfig carries the equivalents
    #[serde(default)]
    pub policy: Option<PolicyConf>,

    /// Additional static routes from the net conf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<CniRoute>>,

    #[serde(rename = "resolvConf", default, skip_serializing_if = "Option::is_none")]
    pub resolv_conf: Option<String>,
}

impl IpamConf {
    /// The etcd endpoints split out of the comma-separated field
    #[must_use]
    pub fn endpoint_list(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Kubernetes client settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KubernetesConf {
    #[serde(default)]
    pub k8s_api_root: Option<String>,
    #[serde(default)]
    pub kubeconfig: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
}

/// Auth policy settings carried for config compatibility
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PolicyConf {
    #[serde(rename = "type", default)]
    pub policy_type: Option<String>,
    #[serde(default)]
    pub k8s_api_root: Option<String>,
    #[serde(default)]
    pub k8s_auth_token: Option<String>,
    #[serde(default)]
    pub k8s_client_certificate: Option<String>,
    #[serde(default)]
    pub k8s_client_key: Option<String>,
    #[serde(default)]
    pub k8s_certificate_authority: Option<String>,
}

/// Parse the stdin blob into the IPAM conf and the config version
///
/// # Errors
///
/// `ConfigError::Parse` on malformed JSON, `MissingIpam` when the `ipam`
/// section is absent, `MissingEndpoints` when no etcd endpoint is given.
pub fn load_ipam_conf(bytes: &[u8]) -> Result<(IpamConf, String), ConfigError> {
    let conf: NetConf =
        serde_json::from_slice(bytes).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let ipam = conf.ipam.ok_or(ConfigError::MissingIpam)?;
    if ipam.endpoint_list().is_empty() {
        return Err(ConfigError::MissingEndpoints);
    }
    Ok((ipam, conf.cni_version))
}

//! CNI environment decoding
//!
//! The runtime passes per-invocation identity through environment
//! variables: `CNI_COMMAND`, `CNI_CONTAINERID`, and `CNI_ARGS` (a
//! `K=V;K=V` string carrying the pod identity under the `K8S_*` keys).

use std::collections::HashMap;

use crate::error::ConfigError;

/// Pod identity decoded from `CNI_ARGS`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct K8sArgs {
    pub pod_name: String,
    pub pod_namespace: String,
    pub pod_infra_container_id: String,
}

impl K8sArgs {
    /// Decode the `K=V;K=V` args string
    ///
    /// Unknown keys are ignored; a token without `=` is an error.
    pub fn parse(args: &str) -> Result<Self, ConfigError> {
        let mut map = HashMap::new();
        for token in args.split(';').filter(|t| !t.is_empty()) {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                ConfigError::invalid_args("CNI_ARGS", format!("malformed token {token:?}"))
            })?;
            map.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            pod_name: map.remove("K8S_POD_NAME").unwrap_or_default(),
            pod_namespace: map.remove("K8S_POD_NAMESPACE").unwrap_or_default(),
            pod_infra_container_id: map
                .remove("K8S_POD_INFRA_CONTAINER_ID")
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pod_identity() {
        let args = K8sArgs::parse(
            "IgnoreUnknown=1;K8S_POD_NAMESPACE=default;K8S_POD_NAME=web-0;K8S_POD_INFRA_CONTAINER_ID=abc123",
        )
        .unwrap();
        assert_eq!(args.pod_name, "web-0");
        assert_eq!(args.pod_namespace, "default");
        assert_eq!(args.pod_infra_container_id, "abc123");
    }

    #[test]
    fn test_parse_empty_args() {
        let args = K8sArgs::parse("").unwrap();
        assert_eq!(args, K8sArgs::default());
    }

    #[test]
    fn test_parse_malformed_token() {
        assert!(K8sArgs::parse("K8S_POD_NAME").is_err());
    }

    #[test]
    fn test_parse_value_with_equals() {
        let args = K8sArgs::parse("K8S_POD_NAME=a=b").unwrap();
        assert_eq!(args.pod_name, "a=b");
    }
}

//! Error types for anchor-ipam
//!
//! This module defines the error hierarchy for the IPAM plugin. Errors are
//! categorized by subsystem; the top-level [`AnchorError`] is what the CNI
//! entry points surface, together with the CNI error code it maps to.

use std::io;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use thiserror::Error;

/// Top-level error type for anchor-ipam
#[derive(Debug, Error)]
pub enum AnchorError {
    /// Network configuration errors (stdin JSON, environment args)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pool text / range algebra errors
    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    /// KV store and cluster lock errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Allocation errors
    #[error("Allocation error: {0}")]
    Alloc(#[from] AllocError),

    /// Pod metadata fetch errors
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AnchorError {
    /// CNI error code reported to the container runtime
    ///
    /// Follows the CNI convention: 4 = invalid environment, 7 = invalid
    /// network configuration, 11 = try again later.
    #[must_use]
    pub fn cni_code(&self) -> u32 {
        match self {
            Self::Config(ConfigError::InvalidArgs { .. }) => 4,
            Self::Config(_) | Self::Range(_) => 7,
            Self::Store(e) => {
                if e.is_recoverable() {
                    11
                } else {
                    7
                }
            }
            Self::Alloc(AllocError::Store(e)) => {
                if e.is_recoverable() {
                    11
                } else {
                    7
                }
            }
            Self::Alloc(_) => 7,
            Self::Runtime(_) => 11,
            Self::Io(_) => 999,
        }
    }
}

/// Network configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed JSON on stdin or in a config file
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// The net conf has no `ipam` section
    #[error("IPAM config missing 'ipam' key")]
    MissingIpam,

    /// The IPAM section has no etcd endpoints
    #[error("IPAM config missing 'etcd_endpoints' key")]
    MissingEndpoints,

    /// Malformed CNI_ARGS or missing required environment
    #[error("Invalid CNI environment: {name}: {reason}")]
    InvalidArgs { name: String, reason: String },

    /// No usable config file in the admin config directory
    #[error("No configuration found in {dir}")]
    NoConfigFound { dir: String },

    /// I/O error while reading a config file
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] io::Error),
}

impl ConfigError {
    /// Create an invalid-environment error
    pub fn invalid_args(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Pool text parse and range algebra errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// A token in the pool text is not an address or bracketed span
    #[error("invalid IP range token {0:?}")]
    ParseToken(String),

    /// Canonicalization over an empty set
    #[error("empty range set")]
    EmptySet,

    /// Interval endpoints out of order
    #[error("range start {start} is after range end {end}")]
    EndpointsReversed { start: Ipv4Addr, end: Ipv4Addr },

    /// An endpoint lies outside the range's subnet
    #[error("address {ip} not in subnet {subnet}")]
    OutOfSubnet { ip: Ipv4Addr, subnet: Ipv4Net },

    /// A gateway lies outside the range's subnet
    #[error("gateway {gateway} not in subnet {subnet}")]
    GatewayOutOfSubnet { gateway: Ipv4Addr, subnet: Ipv4Net },

    /// Two ranges in a canonical set intersect
    #[error("ranges {0} and {1} overlap")]
    Overlap(String, String),
}

/// KV store and cluster lock errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport failure talking to the KV cluster
    #[error("store transport error: {0}")]
    Transport(String),

    /// Cluster lock acquisition or release failed
    #[error("cluster lock error: {0}")]
    Lock(String),

    /// The namespace has no pool entry
    #[error("no IP pool registered for namespace {namespace:?}")]
    PoolMissing { namespace: String },

    /// A persisted pool or binding no longer parses
    #[error("stored range text is invalid: {0}")]
    Range(#[from] RangeError),
}

impl StoreError {
    /// Check if this error is recoverable (another invocation may succeed)
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Lock(_) => true,
            Self::PoolMissing { .. } | Self::Range(_) => false,
        }
    }
}

impl From<etcd_client::Error> for StoreError {
    fn from(e: etcd_client::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Allocation errors
#[derive(Debug, Error)]
pub enum AllocError {
    /// `cni.anchor.org/subnet` is absent from the customization map
    #[error("no subnet in customizations")]
    SubnetMissing,

    /// `cni.anchor.org/subnet` does not parse as a CIDR
    #[error("invalid format of subnet in customizations: {0:?}")]
    InvalidSubnet(String),

    /// `cni.anchor.org/range` is reserved and unimplemented
    #[error("customized range is not implemented")]
    RangeNotImplemented,

    /// `cni.anchor.org/gateway` does not parse as an address
    #[error("invalid format of gateway in customizations: {0:?}")]
    InvalidGateway(String),

    /// The gateway map has no entry for the subnet
    #[error("failed to retrieve gateway for {subnet}")]
    GatewayMissing { subnet: Ipv4Net },

    /// The gateway does not lie within the subnet
    #[error("gateway {gateway} not in network {subnet}")]
    GatewayOutOfSubnet { gateway: Ipv4Addr, subnet: Ipv4Net },

    /// A `cni.anchor.org/routes` entry does not parse or its gateway is
    /// outside the subnet
    #[error("invalid customized route in {0:?}")]
    InvalidRoute(String),

    /// The service cluster IP range does not parse
    #[error("invalid service cluster IP range {0:?}")]
    InvalidServiceRange(String),

    /// No free address remains in the pool
    #[error("cannot allocate IP for pod {pod:?}")]
    Exhausted { pod: String },

    /// Pool or used-set text failed canonicalization
    #[error(transparent)]
    Range(#[from] RangeError),

    /// Store failure during allocation
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Pod metadata fetch errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Kube client construction failed
    #[error("failed to build kubernetes client: {0}")]
    Client(String),

    /// Pod lookup failed
    #[error("failed to fetch pod {namespace}/{pod}: {reason}")]
    PodUnavailable {
        namespace: String,
        pod: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_recovery_classification() {
        assert!(StoreError::Transport("dial tcp".into()).is_recoverable());
        assert!(StoreError::Lock("lease lost".into()).is_recoverable());
        assert!(!StoreError::PoolMissing {
            namespace: "default".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_cni_code_mapping() {
        let err: AnchorError = ConfigError::MissingIpam.into();
        assert_eq!(err.cni_code(), 7);

        let err: AnchorError = ConfigError::invalid_args("CNI_ARGS", "missing").into();
        assert_eq!(err.cni_code(), 4);

        let err: AnchorError = StoreError::Transport("etcd down".into()).into();
        assert_eq!(err.cni_code(), 11);

        let err: AnchorError = AllocError::Exhausted { pod: "web-0".into() }.into();
        assert_eq!(err.cni_code(), 7);
    }

    #[test]
    fn test_error_display() {
        let err = AllocError::GatewayMissing {
            subnet: "10.0.1.0/24".parse().unwrap(),
        };
        assert!(err.to_string().contains("10.0.1.0/24"));

        let err = RangeError::ParseToken("10.0.1.[2-".into());
        assert!(err.to_string().contains("10.0.1.[2-"));
    }
}

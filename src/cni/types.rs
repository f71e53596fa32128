//! CNI result and error JSON types
//!
//! The shapes the container runtime reads on stdout: a result with one
//! `ips` entry plus the derived routes on ADD, or a CNI error object on
//! any failure.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::AnchorError;

/// The CNI result printed on a successful ADD
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CniResult {
    /// Config version echoed back to the runtime
    #[serde(rename = "cniVersion", skip_serializing_if = "String::is_empty", default)]
    pub cni_version: String,

    /// Assigned addresses; exactly one entry after a successful allocation
    #[serde(default)]
    pub ips: Vec<IpConfig>,

    /// Derived routes (default route, customized routes, service route)
    #[serde(default)]
    pub routes: Vec<CniRoute>,

    /// DNS settings; the hook exists but is never populated
    #[serde(default)]
    pub dns: CniDns,
}

impl CniResult {
    /// Serialize with the version the net conf asked for
    pub fn render(&self, cni_version: &str) -> Result<String, AnchorError> {
        let mut out = self.clone();
        out.cni_version = cni_version.to_string();
        serde_json::to_string(&out)
            .map_err(|e| AnchorError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }
}

/// One allocated address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    /// Address family; always `"4"`
    pub version: String,

    /// The address in CIDR form, mask taken from the pool's subnet
    pub address: Ipv4Net,

    /// Gateway for the address's subnet
    pub gateway: Ipv4Addr,
}

impl IpConfig {
    /// Build a v4 entry for `ip` with `subnet`'s mask and `gateway`
    #[must_use]
    pub fn v4(ip: Ipv4Addr, subnet: Ipv4Net, gateway: Ipv4Addr) -> Self {
        Self {
            version: "4".to_string(),
            address: Ipv4Net::new(ip, subnet.prefix_len())
                .expect("prefix length comes from a parsed subnet"),
            gateway,
        }
    }
}

/// One route entry of the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CniRoute {
    /// Destination network
    pub dst: Ipv4Net,

    /// Next hop
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gw: Option<Ipv4Addr>,
}

impl CniRoute {
    /// Build a route `dst -> gw`
    #[must_use]
    pub fn new(dst: Ipv4Net, gw: Ipv4Addr) -> Self {
        Self { dst, gw: Some(gw) }
    }

    /// The default route `0.0.0.0/0 -> gw`
    #[must_use]
    pub fn default_via(gw: Ipv4Addr) -> Self {
        Self::new(
            Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).expect("/0 is a valid prefix"),
            gw,
        )
    }
}

/// DNS settings in the result; carried empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CniDns {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub search: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub options: Vec<String>,
}

/// The CNI error object printed on stdout when an invocation fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CniError {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<String>,
}

impl CniError {
    /// Build the error object for a failed invocation
    #[must_use]
    pub fn from_error(err: &AnchorError, cni_version: &str) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            code: err.cni_code(),
            msg: err.to_string(),
            details: None,
        }
    }
}

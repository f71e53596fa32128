//! Persistent state shared by every invocation
//!
//! The store abstracts a strongly-consistent, cluster-wide key-value
//! service holding the gateway map, the per-namespace pools and the
//! per-container bindings, plus the single named lock under which all
//! allocations serialize.
//!
//! # Key schema
//!
//! | Key | Value |
//! |---|---|
//! | `/anchor/cn/<container_id>` | `ip,pod,namespace,controller` |
//! | `/anchor/gw/<subnet_cidr>` | `gateway_ip` |
//! | `/anchor/ns/<namespace>` | pool text |
//! | `/anchor/lock` | lock lease |

pub mod etcd;
pub mod memory;

use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::range::RangeSet;

/// Prefix for per-container binding keys
pub const IPS_PREFIX: &str = "/anchor/cn/";
/// Prefix for subnet gateway keys
pub const GATEWAY_PREFIX: &str = "/anchor/gw/";
/// Prefix for per-namespace pool keys
pub const POOL_PREFIX: &str = "/anchor/ns/";
/// The single cluster lock key
pub const LOCK_KEY: &str = "/anchor/lock";

/// Capability set used by the allocator and cleaner
///
/// `lock()` blocks until the cluster lock is granted; it is not re-entrant.
/// Callers must pair `lock`/`unlock` on every exit path.
#[async_trait]
pub trait Store: Send + Sync {
    /// Acquire the cluster lock, blocking until granted
    async fn lock(&self) -> Result<(), StoreError>;

    /// Release the cluster lock
    async fn unlock(&self) -> Result<(), StoreError>;

    /// Release session-held resources
    async fn close(&self) -> Result<(), StoreError>;

    /// Gateway registered for `subnet`, or `None` on a missing key, a value
    /// that does not parse, or a transport failure
    async fn retrieve_gateway(&self, subnet: Ipv4Net) -> Option<Ipv4Addr>;

    /// The pool assigned to `namespace`, parsed relative to `subnet`
    async fn retrieve_allocated(
        &self,
        namespace: &str,
        subnet: Ipv4Net,
    ) -> Result<RangeSet, StoreError>;

    /// Union of the IPs bound in `namespace`, parsed relative to `subnet`
    async fn retrieve_used(
        &self,
        namespace: &str,
        subnet: Ipv4Net,
    ) -> Result<RangeSet, StoreError>;

    /// Write the binding for `id`; `false` means the write did not take
    /// (no distinction between "already exists" and other write failures)
    async fn reserve(
        &self,
        id: &str,
        ip: Ipv4Addr,
        pod: &str,
        namespace: &str,
        controller: &str,
    ) -> Result<bool, StoreError>;

    /// Delete the binding for `id`
    async fn release(&self, id: &str) -> Result<(), StoreError>;
}

/// Pool-editor surface used by the admin API
#[async_trait]
pub trait AdminStore: Send + Sync {
    /// All gateway map entries, skipping ones that no longer parse
    async fn all_gateway_map(&self) -> Result<Vec<GatewayMap>, StoreError>;

    /// Upsert one gateway map entry
    async fn insert_gateway_map(&self, gm: GatewayMap) -> Result<(), StoreError>;

    /// Delete a batch of gateway map entries
    async fn delete_gateway_map(&self, gms: Vec<GatewayMap>) -> Result<(), StoreError>;

    /// All pool map entries
    async fn all_allocate_map(&self) -> Result<Vec<AllocateMap>, StoreError>;

    /// Upsert one pool map entry
    async fn insert_allocate_map(&self, am: AllocateMap) -> Result<(), StoreError>;

    /// Delete a batch of pool map entries
    async fn delete_allocate_map(&self, ams: Vec<AllocateMap>) -> Result<(), StoreError>;

    /// Bindings filtered by namespace; an admin role sees every namespace
    async fn bindings(&self, namespace: &str, admin_role: bool)
        -> Result<Vec<Binding>, StoreError>;
}

/// One subnet → gateway entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMap {
    /// Subnet in CIDR text, e.g. `10.2.1.0/24`
    pub subnet: String,
    /// Gateway in dotted-quad text
    #[serde(rename = "gw")]
    pub gateway: String,
}

/// One namespace → pool entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateMap {
    /// Pool text, e.g. `10.0.1.[2-4],10.0.1.8`
    #[serde(rename = "ips")]
    pub allocate: String,
    /// Namespace the pool belongs to
    #[serde(rename = "ns")]
    pub namespace: String,
}

/// A persisted container → IP binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// The bound IP in dotted-quad text
    pub ip: String,
    /// Pod name
    pub pod: String,
    /// Pod namespace
    #[serde(rename = "ns")]
    pub namespace: String,
    /// Owning controller name, `unknown` when unresolved
    #[serde(rename = "ctrl")]
    pub controller: String,
}

impl Binding {
    /// Encode as the stored record value `ip,pod,namespace,controller`
    #[must_use]
    pub fn to_record(&self) -> String {
        format!("{},{},{},{}", self.ip, self.pod, self.namespace, self.controller)
    }

    /// Decode a stored record value; `None` if the row is truncated
    #[must_use]
    pub fn from_record(record: &str) -> Option<Self> {
        let mut parts = record.splitn(4, ',');
        Some(Self {
            ip: parts.next()?.to_string(),
            pod: parts.next()?.to_string(),
            namespace: parts.next()?.to_string(),
            controller: parts.next()?.to_string(),
        })
    }

    /// Namespace column of a stored record without a full decode
    #[must_use]
    pub(crate) fn record_namespace(record: &str) -> Option<&str> {
        record.split(',').nth(2)
    }

    /// IP column of a stored record without a full decode
    #[must_use]
    pub(crate) fn record_ip(record: &str) -> Option<&str> {
        record.split(',').next()
    }
}

//! anchor-ipam: etcd-backed IPAM for container networking
//!
//! This crate assigns one IPv4 address per container from a per-namespace
//! pool held in etcd, records the binding, and returns the address with
//! its gateway and derived routes to the container runtime. Teardown
//! releases the binding. A small HTTP admin API edits the pools and the
//! gateway map.
//!
//! # Architecture
//!
//! ```text
//! runtime ── ADD/DEL ──▶ anchor (CNI plugin) ──▶ Allocator / Cleaner
//!                                                      │
//!                                            cluster lock + KV (etcd)
//!                                                      │
//! operator ── HTTP ──▶ anchor-admin ──▶ gateway map / pool map / bindings
//! ```
//!
//! Every allocation runs the read-choose-write sequence under a single
//! named cluster lock, so two hosts can never reserve the same address.
//! Selection is first-fit over the canonical pool: the numerically lowest
//! free address that is not the gateway.
//!
//! # Modules
//!
//! - [`range`]: IPv4 interval algebra (pool text, canonical form, iteration)
//! - [`store`]: the KV capability traits, the etcd store, the in-memory store
//! - [`allocator`]: per-invocation allocation and release
//! - [`cni`]: net conf decoding, CNI_ARGS, result shaping, ADD/DEL entry
//! - [`runtime`]: pod metadata fetch from the orchestrator
//! - [`admin`]: the HTTP admin API
//! - [`error`]: error types

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod admin;
pub mod allocator;
pub mod cni;
pub mod error;
pub mod range;
pub mod runtime;
pub mod store;

// Re-export commonly used types at the crate root
pub use allocator::{Allocator, Cleaner};
pub use error::{AllocError, AnchorError, ConfigError, RangeError, RuntimeError, StoreError};
pub use range::{Range, RangeIter, RangeSet};
pub use store::{AdminStore, AllocateMap, Binding, EtcdStore, GatewayMap, MemoryStore, Store};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

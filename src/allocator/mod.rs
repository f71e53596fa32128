//! Address allocation and release
//!
//! An [`Allocator`] lives for one CNI ADD: it resolves the subnet and
//! gateway from the customization map (or the store's gateway map), shapes
//! the result's routes, and picks the first free address in the pool under
//! the cluster lock. A [`Cleaner`] lives for one DEL and removes the
//! binding.
//!
//! The customization map carries `cni.anchor.org/*` entries merged from the
//! pod's labels and annotations.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tracing::{debug, info};

use crate::cni::types::{CniResult, CniRoute, IpConfig};
use crate::error::{AllocError, StoreError};
use crate::store::Store;

/// Pins the subnet the pool is interpreted against
pub const SUBNET_KEY: &str = "cni.anchor.org/subnet";
/// Reserved for sub-range carving; presence is an error
pub const RANGE_KEY: &str = "cni.anchor.org/range";
/// Pins the gateway instead of consulting the gateway map
pub const GATEWAY_KEY: &str = "cni.anchor.org/gateway";
/// Extra routes, `dst_cidr,gw_ip;dst_cidr,gw_ip` syntax
pub const ROUTES_KEY: &str = "cni.anchor.org/routes";
/// Controller name recorded in the binding
pub const CONTROLLER_KEY: &str = "cni.anchor.org/controller";

fn non_empty<'a>(customized: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    customized.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// Per-invocation allocator bound to a store session
pub struct Allocator<'a, S: Store + ?Sized> {
    store: &'a S,
    pod: String,
    namespace: String,
    customized: HashMap<String, String>,
    subnet: Ipv4Net,
    gateway: Ipv4Addr,
}

impl<'a, S: Store + ?Sized> Allocator<'a, S> {
    /// Resolve subnet and gateway and bind the allocator to `store`
    ///
    /// The subnet comes from `cni.anchor.org/subnet` and is required. The
    /// gateway comes from `cni.anchor.org/gateway` when present, otherwise
    /// from the store's gateway map under the cluster lock. The gateway
    /// must lie within the subnet.
    pub async fn new(
        store: &'a S,
        pod: impl Into<String>,
        namespace: impl Into<String>,
        customized: HashMap<String, String>,
    ) -> Result<Self, AllocError> {
        let subnet_text =
            non_empty(&customized, SUBNET_KEY).ok_or(AllocError::SubnetMissing)?;
        // Keep the network address, not the host bits the annotation may
        // carry; the gateway map is keyed by the network's CIDR text
        let subnet: Ipv4Net = subnet_text
            .parse::<Ipv4Net>()
            .map_err(|_| AllocError::InvalidSubnet(subnet_text.to_string()))?
            .trunc();

        if non_empty(&customized, RANGE_KEY).is_some() {
            return Err(AllocError::RangeNotImplemented);
        }

        let gateway = match non_empty(&customized, GATEWAY_KEY) {
            Some(text) => text
                .parse()
                .map_err(|_| AllocError::InvalidGateway(text.to_string()))?,
            None => {
                store.lock().await?;
                let gw = store.retrieve_gateway(subnet).await;
                store.unlock().await?;
                gw.ok_or(AllocError::GatewayMissing { subnet })?
            }
        };

        if !subnet.contains(&gateway) {
            return Err(AllocError::GatewayOutOfSubnet { gateway, subnet });
        }

        Ok(Self {
            store,
            pod: pod.into(),
            namespace: namespace.into(),
            customized,
            subnet,
            gateway,
        })
    }

    /// The subnet the pool is interpreted against
    #[must_use]
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// The gateway handed to the container
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Gateway hook; the gateway is applied by [`Allocator::customize_routes`]
    ///
    /// Retained so callers can sequence the shaping hooks uniformly.
    pub fn customize_gateway(&self, _result: &mut CniResult) -> Result<(), AllocError> {
        Ok(())
    }

    /// Append the default route and any `cni.anchor.org/routes` entries
    ///
    /// Route syntax: semicolons separate routes, commas separate
    /// `(dst_cidr, gw_ip)`. Each gateway must lie within the subnet.
    pub fn customize_routes(&self, result: &mut CniResult) -> Result<(), AllocError> {
        result.routes.push(CniRoute::default_via(self.gateway));

        let Some(routes_text) = non_empty(&self.customized, ROUTES_KEY) else {
            return Ok(());
        };
        for entry in routes_text.split(';') {
            let (dst_text, gw_text) = entry
                .split_once(',')
                .ok_or_else(|| AllocError::InvalidRoute(entry.to_string()))?;
            let dst: Ipv4Net = dst_text
                .trim()
                .parse()
                .map_err(|_| AllocError::InvalidRoute(entry.to_string()))?;
            let gw: Ipv4Addr = gw_text
                .trim()
                .parse()
                .map_err(|_| AllocError::InvalidRoute(entry.to_string()))?;
            if !self.subnet.contains(&gw) {
                return Err(AllocError::GatewayOutOfSubnet {
                    gateway: gw,
                    subnet: self.subnet,
                });
            }
            result.routes.push(CniRoute::new(dst.trunc(), gw));
        }
        Ok(())
    }

    /// DNS hook; the orchestrator ignores result DNS today, so this is a
    /// no-op kept as part of the contract
    pub fn customize_dns(&self, _result: &mut CniResult) -> Result<(), AllocError> {
        Ok(())
    }

    /// Route the service cluster IP range through this node
    ///
    /// Appends `service_cidr -> node_ip` for the first node IP inside the
    /// subnet. Does nothing when `service_cidr` is empty or no node IP
    /// matches.
    pub fn add_service_route(
        &self,
        result: &mut CniResult,
        service_cidr: &str,
        node_ips: &[String],
    ) -> Result<(), AllocError> {
        if service_cidr.is_empty() {
            return Ok(());
        }
        let dst: Ipv4Net = service_cidr
            .parse()
            .map_err(|_| AllocError::InvalidServiceRange(service_cidr.to_string()))?;

        let node_ip = node_ips
            .iter()
            .filter_map(|s| s.parse::<Ipv4Addr>().ok())
            .find(|ip| self.subnet.contains(ip));
        if let Some(gw) = node_ip {
            result.routes.push(CniRoute::new(dst.trunc(), gw));
        }
        Ok(())
    }

    /// Allocate an address for the container identified by `id`
    ///
    /// Runs the read-choose-write sequence under the cluster lock:
    /// first-fit over the canonical pool, skipping used addresses and the
    /// gateway. A `reserve` that does not take moves on to the next
    /// candidate.
    pub async fn allocate(&self, id: &str) -> Result<IpConfig, AllocError> {
        self.store.lock().await?;
        let result = self.allocate_locked(id).await;
        self.store.unlock().await?;
        result
    }

    async fn allocate_locked(&self, id: &str) -> Result<IpConfig, AllocError> {
        let mut pool = self
            .store
            .retrieve_allocated(&self.namespace, self.subnet)
            .await?;
        pool.set_gateway(self.gateway);
        for r in pool.ranges() {
            r.canonicalize()?;
        }

        let mut used = self
            .store
            .retrieve_used(&self.namespace, self.subnet)
            .await?;
        used.set_gateway(self.gateway);
        for r in used.ranges() {
            r.canonicalize()?;
        }

        let controller = non_empty(&self.customized, CONTROLLER_KEY).unwrap_or("unknown");

        for r in pool.ranges() {
            for candidate in u32::from(r.start())..=u32::from(r.end()) {
                let ip = Ipv4Addr::from(candidate);
                if ip == self.gateway || used.contains(ip) {
                    continue;
                }
                if !self
                    .store
                    .reserve(id, ip, &self.pod, &self.namespace, controller)
                    .await?
                {
                    debug!("reserve of {ip} for {id} did not take, trying next candidate");
                    continue;
                }
                info!(
                    pod = %self.pod,
                    namespace = %self.namespace,
                    %ip,
                    "allocated address"
                );
                return Ok(IpConfig::v4(ip, self.subnet, self.gateway));
            }
        }

        Err(AllocError::Exhausted {
            pod: self.pod.clone(),
        })
    }
}

/// Per-invocation cleaner removing the binding for a container
pub struct Cleaner<'a, S: Store + ?Sized> {
    store: &'a S,
    pod: String,
    namespace: String,
}

impl<'a, S: Store + ?Sized> Cleaner<'a, S> {
    /// Bind a cleaner to `store`
    pub fn new(store: &'a S, pod: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            pod: pod.into(),
            namespace: namespace.into(),
        }
    }

    /// Delete the binding for `id` under the cluster lock
    ///
    /// No membership check is performed; releasing an unknown id is as
    /// idempotent as the underlying delete.
    pub async fn clean(&self, id: &str) -> Result<(), StoreError> {
        self.store.lock().await?;
        let result = self.store.release(id).await;
        self.store.unlock().await?;
        if result.is_ok() {
            info!(pod = %self.pod, namespace = %self.namespace, "released binding for {id}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn customized(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_gateway("10.0.1.0/24", "10.0.1.1");
        store.put_pool("default", "10.0.1.[2-10]");
        store
    }

    #[tokio::test]
    async fn test_new_requires_subnet() {
        let store = seeded_store();
        let err = Allocator::new(&store, "web-0", "default", HashMap::new()).await;
        assert!(matches!(err, Err(AllocError::SubnetMissing)));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_subnet() {
        let store = seeded_store();
        let err = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/33")]),
        )
        .await;
        assert!(matches!(err, Err(AllocError::InvalidSubnet(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_range_key() {
        let store = seeded_store();
        let err = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24"), (RANGE_KEY, "10.0.1.64/26")]),
        )
        .await;
        assert!(matches!(err, Err(AllocError::RangeNotImplemented)));
    }

    #[tokio::test]
    async fn test_new_takes_gateway_from_store() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await
        .unwrap();
        assert_eq!(alloc.gateway(), "10.0.1.1".parse::<Ipv4Addr>().unwrap());
        // The constructor's lock must have been released
        store.lock().await.unwrap();
        store.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_new_gateway_annotation_wins() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24"), (GATEWAY_KEY, "10.0.1.254")]),
        )
        .await
        .unwrap();
        assert_eq!(alloc.gateway(), "10.0.1.254".parse::<Ipv4Addr>().unwrap());
    }

    #[tokio::test]
    async fn test_new_missing_gateway_fails() {
        let store = MemoryStore::new();
        store.put_pool("default", "10.0.1.[2-10]");
        let err = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await;
        assert!(matches!(err, Err(AllocError::GatewayMissing { .. })));
    }

    #[tokio::test]
    async fn test_new_gateway_outside_subnet_fails() {
        let store = seeded_store();
        let err = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24"), (GATEWAY_KEY, "10.0.2.1")]),
        )
        .await;
        assert!(matches!(err, Err(AllocError::GatewayOutOfSubnet { .. })));
    }

    #[tokio::test]
    async fn test_allocate_first_fit_skips_used_and_gateway() {
        let store = MemoryStore::new();
        store.put_gateway("10.0.1.0/24", "10.0.1.1");
        store.put_pool("default", "10.0.1.[1-10]");
        store
            .reserve("used-1", "10.0.1.2".parse().unwrap(), "a", "default", "x")
            .await
            .unwrap();
        store
            .reserve("used-2", "10.0.1.3".parse().unwrap(), "b", "default", "x")
            .await
            .unwrap();

        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await
        .unwrap();

        // .1 is the gateway, .2 and .3 are used: first fit is .4
        let ip = alloc.allocate("cid-1").await.unwrap();
        assert_eq!(ip.version, "4");
        assert_eq!(ip.address, "10.0.1.4/24".parse::<Ipv4Net>().unwrap());
        assert_eq!(ip.gateway, "10.0.1.1".parse::<Ipv4Addr>().unwrap());
    }

    #[tokio::test]
    async fn test_allocate_exhausted_reports_pod() {
        let store = MemoryStore::new();
        store.put_gateway("10.0.1.0/24", "10.0.1.1");
        store.put_pool("default", "10.0.1.1"); // the gateway is the whole pool

        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await
        .unwrap();

        match alloc.allocate("cid-1").await {
            Err(AllocError::Exhausted { pod }) => assert_eq!(pod, "web-0"),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        // The lock must have been released on the failure path
        store.lock().await.unwrap();
        store.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_allocate_missing_pool_fails() {
        let store = MemoryStore::new();
        store.put_gateway("10.0.1.0/24", "10.0.1.1");

        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await
        .unwrap();

        assert!(matches!(
            alloc.allocate("cid-1").await,
            Err(AllocError::Store(StoreError::PoolMissing { .. }))
        ));
    }

    #[tokio::test]
    async fn test_allocate_records_controller_tag() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24"), (CONTROLLER_KEY, "web")]),
        )
        .await
        .unwrap();
        alloc.allocate("cid-1").await.unwrap();

        use crate::store::AdminStore;
        let bindings = store.bindings("default", true).await.unwrap();
        assert_eq!(bindings[0].controller, "web");
    }

    #[tokio::test]
    async fn test_allocate_controller_defaults_to_unknown() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await
        .unwrap();
        alloc.allocate("cid-1").await.unwrap();

        use crate::store::AdminStore;
        let bindings = store.bindings("default", true).await.unwrap();
        assert_eq!(bindings[0].controller, "unknown");
    }

    #[tokio::test]
    async fn test_customize_routes_default_and_annotation() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[
                (SUBNET_KEY, "10.0.1.0/24"),
                (ROUTES_KEY, "10.0.5.0/24,10.0.1.5;10.0.6.0/24,10.0.1.6"),
            ]),
        )
        .await
        .unwrap();

        let mut result = CniResult::default();
        alloc.customize_gateway(&mut result).unwrap();
        alloc.customize_routes(&mut result).unwrap();
        alloc.customize_dns(&mut result).unwrap();

        assert_eq!(result.routes.len(), 3);
        assert_eq!(
            result.routes[0],
            CniRoute::default_via("10.0.1.1".parse().unwrap())
        );
        assert_eq!(
            result.routes[1],
            CniRoute::new("10.0.5.0/24".parse().unwrap(), "10.0.1.5".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_customize_routes_rejects_foreign_gateway() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24"), (ROUTES_KEY, "10.0.5.0/24,10.9.9.9")]),
        )
        .await
        .unwrap();

        let mut result = CniResult::default();
        assert!(matches!(
            alloc.customize_routes(&mut result),
            Err(AllocError::GatewayOutOfSubnet { .. })
        ));
    }

    #[tokio::test]
    async fn test_customize_routes_rejects_malformed_entry() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24"), (ROUTES_KEY, "10.0.5.0/24")]),
        )
        .await
        .unwrap();

        let mut result = CniResult::default();
        assert!(matches!(
            alloc.customize_routes(&mut result),
            Err(AllocError::InvalidRoute(_))
        ));
    }

    #[tokio::test]
    async fn test_add_service_route_picks_first_matching_node() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await
        .unwrap();

        let mut result = CniResult::default();
        alloc
            .add_service_route(
                &mut result,
                "10.96.0.0/12",
                &["192.168.0.7".to_string(), "10.0.1.7".to_string()],
            )
            .unwrap();
        assert_eq!(
            result.routes,
            vec![CniRoute::new(
                "10.96.0.0/12".parse().unwrap(),
                "10.0.1.7".parse().unwrap()
            )]
        );
    }

    #[tokio::test]
    async fn test_add_service_route_no_match_is_noop() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await
        .unwrap();

        let mut result = CniResult::default();
        alloc
            .add_service_route(&mut result, "10.96.0.0/12", &["192.168.0.7".to_string()])
            .unwrap();
        assert!(result.routes.is_empty());

        alloc.add_service_route(&mut result, "", &[]).unwrap();
        assert!(result.routes.is_empty());
    }

    #[tokio::test]
    async fn test_cleaner_releases_binding() {
        let store = seeded_store();
        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await
        .unwrap();
        alloc.allocate("cid-1").await.unwrap();
        assert_eq!(store.binding_count(), 1);

        let cleaner = Cleaner::new(&store, "web-0", "default");
        cleaner.clean("cid-1").await.unwrap();
        assert_eq!(store.binding_count(), 0);

        // Releasing again is harmless
        cleaner.clean("cid-1").await.unwrap();
    }

    /// Store wrapper whose reserve refuses a scripted number of times
    struct FlakyReserve {
        inner: MemoryStore,
        refusals: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Store for FlakyReserve {
        async fn lock(&self) -> Result<(), StoreError> {
            self.inner.lock().await
        }
        async fn unlock(&self) -> Result<(), StoreError> {
            self.inner.unlock().await
        }
        async fn close(&self) -> Result<(), StoreError> {
            self.inner.close().await
        }
        async fn retrieve_gateway(&self, subnet: Ipv4Net) -> Option<Ipv4Addr> {
            self.inner.retrieve_gateway(subnet).await
        }
        async fn retrieve_allocated(
            &self,
            namespace: &str,
            subnet: Ipv4Net,
        ) -> Result<crate::range::RangeSet, StoreError> {
            self.inner.retrieve_allocated(namespace, subnet).await
        }
        async fn retrieve_used(
            &self,
            namespace: &str,
            subnet: Ipv4Net,
        ) -> Result<crate::range::RangeSet, StoreError> {
            self.inner.retrieve_used(namespace, subnet).await
        }
        async fn reserve(
            &self,
            id: &str,
            ip: Ipv4Addr,
            pod: &str,
            namespace: &str,
            controller: &str,
        ) -> Result<bool, StoreError> {
            use std::sync::atomic::Ordering;
            if self.refusals.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            })
            .is_ok()
            {
                return Ok(false);
            }
            self.inner.reserve(id, ip, pod, namespace, controller).await
        }
        async fn release(&self, id: &str) -> Result<(), StoreError> {
            self.inner.release(id).await
        }
    }

    #[tokio::test]
    async fn test_failed_reserve_moves_to_next_candidate() {
        let inner = seeded_store();
        let store = FlakyReserve {
            inner,
            refusals: std::sync::atomic::AtomicUsize::new(2),
        };

        let alloc = Allocator::new(
            &store,
            "web-0",
            "default",
            customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
        )
        .await
        .unwrap();

        // .2 and .3 refuse, so the allocation lands on .4
        let ip = alloc.allocate("cid-1").await.unwrap();
        assert_eq!(ip.address, "10.0.1.4/24".parse::<Ipv4Net>().unwrap());
    }
}

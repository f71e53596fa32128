//! In-memory store
//!
//! Holds the three maps behind local mutexes and models the cluster lock
//! with a one-permit semaphore, so `lock`/`unlock` may straddle await
//! points the way the real named lock does. Used by the test suites and
//! usable as a single-host store.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{AdminStore, AllocateMap, Binding, GatewayMap, Store};
use crate::error::StoreError;
use crate::range::RangeSet;

/// Store holding all state in process-local maps
#[derive(Debug)]
pub struct MemoryStore {
    lock: Semaphore,
    gateways: Mutex<BTreeMap<String, String>>,
    pools: Mutex<BTreeMap<String, String>>,
    bindings: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            lock: Semaphore::new(1),
            gateways: Mutex::new(BTreeMap::new()),
            pools: Mutex::new(BTreeMap::new()),
            bindings: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed a subnet → gateway entry
    pub fn put_gateway(&self, subnet: &str, gateway: &str) {
        self.gateways
            .lock()
            .insert(subnet.to_string(), gateway.to_string());
    }

    /// Seed a namespace → pool entry
    pub fn put_pool(&self, namespace: &str, pool: &str) {
        self.pools
            .lock()
            .insert(namespace.to_string(), pool.to_string());
    }

    /// Number of bindings currently stored
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.lock().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn lock(&self) -> Result<(), StoreError> {
        let permit = self
            .lock
            .acquire()
            .await
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        permit.forget();
        Ok(())
    }

    async fn unlock(&self) -> Result<(), StoreError> {
        self.lock.add_permits(1);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn retrieve_gateway(&self, subnet: Ipv4Net) -> Option<Ipv4Addr> {
        self.gateways.lock().get(&subnet.to_string())?.parse().ok()
    }

    async fn retrieve_allocated(
        &self,
        namespace: &str,
        subnet: Ipv4Net,
    ) -> Result<RangeSet, StoreError> {
        let text = self
            .pools
            .lock()
            .get(namespace)
            .cloned()
            .ok_or_else(|| StoreError::PoolMissing {
                namespace: namespace.to_string(),
            })?;
        Ok(RangeSet::parse(&text, subnet)?)
    }

    async fn retrieve_used(
        &self,
        namespace: &str,
        subnet: Ipv4Net,
    ) -> Result<RangeSet, StoreError> {
        let ips: Vec<String> = self
            .bindings
            .lock()
            .values()
            .filter(|record| Binding::record_namespace(record) == Some(namespace))
            .filter_map(|record| Binding::record_ip(record).map(str::to_string))
            .collect();
        Ok(RangeSet::parse(&ips.join(","), subnet)?)
    }

    async fn reserve(
        &self,
        id: &str,
        ip: Ipv4Addr,
        pod: &str,
        namespace: &str,
        controller: &str,
    ) -> Result<bool, StoreError> {
        let record = Binding {
            ip: ip.to_string(),
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            controller: controller.to_string(),
        }
        .to_record();
        self.bindings.lock().insert(id.to_string(), record);
        Ok(true)
    }

    async fn release(&self, id: &str) -> Result<(), StoreError> {
        self.bindings.lock().remove(id);
        Ok(())
    }
}

#[async_trait]
impl AdminStore for MemoryStore {
    async fn all_gateway_map(&self) -> Result<Vec<GatewayMap>, StoreError> {
        Ok(self
            .gateways
            .lock()
            .iter()
            .filter(|(subnet, gw)| {
                subnet.parse::<Ipv4Net>().is_ok() && gw.parse::<Ipv4Addr>().is_ok()
            })
            .map(|(subnet, gw)| GatewayMap {
                subnet: subnet.clone(),
                gateway: gw.clone(),
            })
            .collect())
    }

    async fn insert_gateway_map(&self, gm: GatewayMap) -> Result<(), StoreError> {
        self.gateways.lock().insert(gm.subnet, gm.gateway);
        Ok(())
    }

    async fn delete_gateway_map(&self, gms: Vec<GatewayMap>) -> Result<(), StoreError> {
        let mut gateways = self.gateways.lock();
        for gm in gms {
            gateways.remove(&gm.subnet);
        }
        Ok(())
    }

    async fn all_allocate_map(&self) -> Result<Vec<AllocateMap>, StoreError> {
        Ok(self
            .pools
            .lock()
            .iter()
            .map(|(ns, pool)| AllocateMap {
                allocate: pool.clone(),
                namespace: ns.clone(),
            })
            .collect())
    }

    async fn insert_allocate_map(&self, am: AllocateMap) -> Result<(), StoreError> {
        self.pools.lock().insert(am.namespace, am.allocate);
        Ok(())
    }

    async fn delete_allocate_map(&self, ams: Vec<AllocateMap>) -> Result<(), StoreError> {
        let mut pools = self.pools.lock();
        for am in ams {
            pools.remove(&am.namespace);
        }
        Ok(())
    }

    async fn bindings(
        &self,
        namespace: &str,
        admin_role: bool,
    ) -> Result<Vec<Binding>, StoreError> {
        Ok(self
            .bindings
            .lock()
            .values()
            .filter(|record| admin_role || Binding::record_namespace(record) == Some(namespace))
            .filter_map(|record| Binding::from_record(record))
            .collect())
    }
}

//! etcd-backed store
//!
//! The production store. All keys live under `/anchor/`; the cluster lock
//! is the etcd lock RPC on `/anchor/lock`, which blocks until the lock is
//! granted and hands back an ownership key for the release.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Certificate, Client, ConnectOptions, GetOptions, Identity, KvClient, LockClient, TlsOptions,
};
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    AdminStore, AllocateMap, Binding, GatewayMap, Store, GATEWAY_PREFIX, IPS_PREFIX, LOCK_KEY,
    POOL_PREFIX,
};
use crate::error::StoreError;
use crate::range::RangeSet;

/// Dial timeout for the initial connection to the cluster
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Client certificate material for an etcd cluster that requires TLS
#[derive(Debug, Clone, Default)]
pub struct EtcdTls {
    /// Path to the client certificate (PEM)
    pub cert_file: Option<String>,
    /// Path to the client key (PEM)
    pub key_file: Option<String>,
    /// Path to the CA certificate (PEM)
    pub ca_file: Option<String>,
}

impl EtcdTls {
    fn is_empty(&self) -> bool {
        self.cert_file.is_none() && self.key_file.is_none() && self.ca_file.is_none()
    }

    fn into_options(self) -> Result<TlsOptions, StoreError> {
        let mut tls = TlsOptions::new();
        if let Some(ca) = &self.ca_file {
            let pem = std::fs::read(ca)
                .map_err(|e| StoreError::Transport(format!("read {ca}: {e}")))?;
            tls = tls.ca_certificate(Certificate::from_pem(pem));
        }
        if let (Some(cert), Some(key)) = (&self.cert_file, &self.key_file) {
            let cert_pem = std::fs::read(cert)
                .map_err(|e| StoreError::Transport(format!("read {cert}: {e}")))?;
            let key_pem = std::fs::read(key)
                .map_err(|e| StoreError::Transport(format!("read {key}: {e}")))?;
            tls = tls.identity(Identity::from_pem(cert_pem, key_pem));
        }
        Ok(tls)
    }
}

/// Store backed by an etcd cluster
pub struct EtcdStore {
    kv: KvClient,
    lock: LockClient,

    /// Ownership key returned by the lock RPC while the lock is held
    lock_owner: Mutex<Option<Vec<u8>>>,
}

impl EtcdStore {
    /// Connect to the cluster, optionally with client-cert TLS
    pub async fn connect(
        endpoints: &[String],
        tls: Option<EtcdTls>,
    ) -> Result<Self, StoreError> {
        let mut options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
        if let Some(tls) = tls.filter(|t| !t.is_empty()) {
            options = options.with_tls(tls.into_options()?);
        }

        let client = Client::connect(endpoints, Some(options)).await?;
        debug!("connected to etcd at {:?}", endpoints);

        Ok(Self {
            kv: client.kv_client(),
            lock: client.lock_client(),
            lock_owner: Mutex::new(None),
        })
    }

    fn kv(&self) -> KvClient {
        self.kv.clone()
    }
}

#[async_trait]
impl Store for EtcdStore {
    async fn lock(&self) -> Result<(), StoreError> {
        let resp = self.lock.clone().lock(LOCK_KEY, None).await?;
        *self.lock_owner.lock() = Some(resp.key().to_vec());
        Ok(())
    }

    async fn unlock(&self) -> Result<(), StoreError> {
        let owner = self
            .lock_owner
            .lock()
            .take()
            .ok_or_else(|| StoreError::Lock("unlock without a held lock".into()))?;
        self.lock.clone().unlock(owner).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        // The underlying channel is dropped with the store
        Ok(())
    }

    async fn retrieve_gateway(&self, subnet: Ipv4Net) -> Option<Ipv4Addr> {
        let key = format!("{GATEWAY_PREFIX}{subnet}");
        let resp = self.kv().get(key, None).await.ok()?;
        let kv = resp.kvs().first()?;
        kv.value_str().ok()?.parse().ok()
    }

    async fn retrieve_allocated(
        &self,
        namespace: &str,
        subnet: Ipv4Net,
    ) -> Result<RangeSet, StoreError> {
        let key = format!("{POOL_PREFIX}{namespace}");
        let resp = self.kv().get(key, None).await?;
        let kv = resp.kvs().first().ok_or_else(|| StoreError::PoolMissing {
            namespace: namespace.to_string(),
        })?;
        let text = kv
            .value_str()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(RangeSet::parse(text, subnet)?)
    }

    async fn retrieve_used(
        &self,
        namespace: &str,
        subnet: Ipv4Net,
    ) -> Result<RangeSet, StoreError> {
        let resp = self
            .kv()
            .get(IPS_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;

        let mut ips = Vec::new();
        for kv in resp.kvs() {
            let record = kv
                .value_str()
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            if Binding::record_namespace(record) == Some(namespace) {
                if let Some(ip) = Binding::record_ip(record) {
                    ips.push(ip.to_string());
                }
            }
        }
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

        match self.kv().put(format!("{IPS_PREFIX}{id}"), record, None).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("reserve for {id} failed: {e}");
                Ok(false)
            }
        }
    }

    async fn release(&self, id: &str) -> Result<(), StoreError> {
        self.kv().delete(format!("{IPS_PREFIX}{id}"), None).await?;
        Ok(())
    }
}

#[async_trait]
impl AdminStore for EtcdStore {
    async fn all_gateway_map(&self) -> Result<Vec<GatewayMap>, StoreError> {
        let resp = self
            .kv()
            .get(GATEWAY_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;

        let mut gms = Vec::new();
        for kv in resp.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            let subnet = key.trim_start_matches(GATEWAY_PREFIX);
            let gw = kv
                .value_str()
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            // Skip rows that no longer parse rather than failing the listing
            if subnet.parse::<Ipv4Net>().is_err() || gw.parse::<Ipv4Addr>().is_err() {
                continue;
            }
            gms.push(GatewayMap {
                subnet: subnet.to_string(),
                gateway: gw.to_string(),
            });
        }
        Ok(gms)
    }

    async fn insert_gateway_map(&self, gm: GatewayMap) -> Result<(), StoreError> {
        self.kv()
            .put(format!("{GATEWAY_PREFIX}{}", gm.subnet), gm.gateway, None)
            .await?;
        Ok(())
    }

    async fn delete_gateway_map(&self, gms: Vec<GatewayMap>) -> Result<(), StoreError> {
        for gm in gms {
            self.kv()
                .delete(format!("{GATEWAY_PREFIX}{}", gm.subnet), None)
                .await?;
        }
        Ok(())
    }

    async fn all_allocate_map(&self) -> Result<Vec<AllocateMap>, StoreError> {
        let resp = self
            .kv()
            .get(POOL_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;

        let mut ams = Vec::new();
        for kv in resp.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            let value = kv
                .value_str()
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            ams.push(AllocateMap {
                allocate: value.to_string(),
                namespace: key.trim_start_matches(POOL_PREFIX).to_string(),
            });
        }
        Ok(ams)
    }

    async fn insert_allocate_map(&self, am: AllocateMap) -> Result<(), StoreError> {
        self.kv()
            .put(format!("{POOL_PREFIX}{}", am.namespace), am.allocate, None)
            .await?;
        Ok(())
    }

    async fn delete_allocate_map(&self, ams: Vec<AllocateMap>) -> Result<(), StoreError> {
        for am in ams {
            self.kv()
                .delete(format!("{POOL_PREFIX}{}", am.namespace), None)
                .await?;
        }
        Ok(())
    }

    async fn bindings(
        &self,
        namespace: &str,
        admin_role: bool,
    ) -> Result<Vec<Binding>, StoreError> {
        let resp = self
            .kv()
            .get(IPS_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;

        let mut out = Vec::new();
        for kv in resp.kvs() {
            let record = kv
                .value_str()
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            if !admin_role && Binding::record_namespace(record) != Some(namespace) {
                continue;
            }
            if let Some(b) = Binding::from_record(record) {
                out.push(b);
            }
        }
        Ok(out)
    }
}

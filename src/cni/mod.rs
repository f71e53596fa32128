//! CNI entry orchestration
//!
//! One ADD: load the conf, open the store session, fetch the pod's
//! customization map, shape the result through the allocator's hooks, then
//! allocate. One DEL: open the session and release the binding. Both paths
//! close the store before returning.

pub mod args;
pub mod config;
pub mod types;

use tracing::debug;

use crate::allocator::{Allocator, Cleaner};
use crate::error::AnchorError;
use crate::runtime;
use crate::store::etcd::{EtcdStore, EtcdTls};
use crate::store::Store;

use args::K8sArgs;
use config::{load_ipam_conf, IpamConf};
use types::CniResult;

fn store_tls(conf: &IpamConf) -> EtcdTls {
    EtcdTls {
        cert_file: conf.etcd_cert_file.clone(),
        key_file: conf.etcd_key_file.clone(),
        ca_file: conf.etcd_ca_cert_file.clone(),
    }
}

/// Handle a CNI ADD: allocate an address and derive the routes
///
/// Returns the result to print on stdout together with the config version
/// it should be rendered as.
pub async fn cmd_add(
    stdin: &[u8],
    container_id: &str,
    cni_args: &str,
) -> Result<(CniResult, String), AnchorError> {
    let (conf, cni_version) = load_ipam_conf(stdin)?;
    let k8s_args = K8sArgs::parse(cni_args)?;
    debug!(
        "ADD for container {container_id}, pod {}/{}",
        k8s_args.pod_namespace, k8s_args.pod_name
    );

    let client = runtime::new_client(conf.kubernetes.as_ref()).await?;
    let customized =
        runtime::pod_customizations(&client, &k8s_args.pod_name, &k8s_args.pod_namespace).await?;

    let store = EtcdStore::connect(&conf.endpoint_list(), Some(store_tls(&conf))).await?;
    let result = add_with_store(&store, &conf, &k8s_args, customized, container_id).await;
    store.close().await?;
    Ok((result?, cni_version))
}

/// The ADD body once a store session and customization map exist
///
/// Split out so the flow is exercised end-to-end against the in-memory
/// store.
pub async fn add_with_store<S: Store + ?Sized>(
    store: &S,
    conf: &IpamConf,
    k8s_args: &K8sArgs,
    customized: std::collections::HashMap<String, String>,
    container_id: &str,
) -> Result<CniResult, AnchorError> {
    let alloc = Allocator::new(
        store,
        k8s_args.pod_name.clone(),
        k8s_args.pod_namespace.clone(),
        customized,
    )
    .await?;

    let mut result = CniResult::default();
    alloc.customize_gateway(&mut result)?;
    alloc.customize_routes(&mut result)?;
    alloc.customize_dns(&mut result)?;
    alloc.add_service_route(
        &mut result,
        conf.service_ipnet.as_deref().unwrap_or(""),
        &conf.node_ips,
    )?;

    let ip = alloc.allocate(container_id).await?;
    result.ips.push(ip);
    Ok(result)
}

/// Handle a CNI DEL: release the container's binding
pub async fn cmd_del(stdin: &[u8], container_id: &str, cni_args: &str) -> Result<(), AnchorError> {
    let (conf, _) = load_ipam_conf(stdin)?;
    let k8s_args = K8sArgs::parse(cni_args)?;
    debug!(
        "DEL for container {container_id}, pod {}/{}",
        k8s_args.pod_namespace, k8s_args.pod_name
    );

    let store = EtcdStore::connect(&conf.endpoint_list(), Some(store_tls(&conf))).await?;
    let cleaner = Cleaner::new(&store, k8s_args.pod_name.clone(), k8s_args.pod_namespace.clone());
    let result = cleaner.clean(container_id).await;
    store.close().await?;
    Ok(result?)
}

//! End-to-end allocation tests over the in-memory store
//!
//! These drive the same flow the CNI binary runs, minus the etcd transport
//! and the orchestrator fetch: allocator construction, result shaping,
//! locked allocation, and release.

use std::collections::HashMap;
use std::sync::Arc;

use ipnet::Ipv4Net;

use anchor_ipam::allocator::{Allocator, Cleaner, CONTROLLER_KEY, SUBNET_KEY};
use anchor_ipam::cni::args::K8sArgs;
use anchor_ipam::cni::config::IpamConf;
use anchor_ipam::cni::add_with_store;
use anchor_ipam::error::AllocError;
use anchor_ipam::store::{AdminStore, MemoryStore, Store};

fn customized(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn add_shapes_result_and_allocates_first_fit() {
    let store = MemoryStore::new();
    store.put_gateway("10.0.1.0/24", "10.0.1.1");
    store.put_pool("default", "10.0.1.[2-10]");
    store
        .reserve("used-1", "10.0.1.2".parse().unwrap(), "a", "default", "x")
        .await
        .unwrap();
    store
        .reserve("used-2", "10.0.1.3".parse().unwrap(), "b", "default", "x")
        .await
        .unwrap();

    let conf = IpamConf {
        service_ipnet: Some("10.96.0.0/12".to_string()),
        node_ips: vec!["10.0.1.7".to_string()],
        ..IpamConf::default()
    };
    let k8s_args = K8sArgs {
        pod_name: "web-0".to_string(),
        pod_namespace: "default".to_string(),
        pod_infra_container_id: "cid-1".to_string(),
    };

    let result = add_with_store(
        &store,
        &conf,
        &k8s_args,
        customized(&[(SUBNET_KEY, "10.0.1.0/24"), (CONTROLLER_KEY, "web")]),
        "cid-1",
    )
    .await
    .unwrap();

    assert_eq!(result.ips.len(), 1);
    assert_eq!(
        result.ips[0].address,
        "10.0.1.4/24".parse::<Ipv4Net>().unwrap()
    );
    assert_eq!(
        result.ips[0].gateway,
        "10.0.1.1".parse::<std::net::Ipv4Addr>().unwrap()
    );

    // Default route plus the service route through the in-subnet node IP
    assert_eq!(result.routes.len(), 2);
    assert_eq!(result.routes[0].dst, "0.0.0.0/0".parse::<Ipv4Net>().unwrap());
    assert_eq!(result.routes[1].dst, "10.96.0.0/12".parse::<Ipv4Net>().unwrap());
    assert_eq!(
        result.routes[1].gw,
        Some("10.0.1.7".parse::<std::net::Ipv4Addr>().unwrap())
    );

    let bindings = store.bindings("default", true).await.unwrap();
    let bound = bindings.iter().find(|b| b.pod == "web-0").unwrap();
    assert_eq!(bound.ip, "10.0.1.4");
    assert_eq!(bound.controller, "web");
}

#[tokio::test]
async fn add_then_clean_restores_the_binding_set() {
    let store = MemoryStore::new();
    store.put_gateway("10.0.1.0/24", "10.0.1.1");
    store.put_pool("default", "10.0.1.[2-4]");

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

    Cleaner::new(&store, "web-0", "default")
        .clean("cid-1")
        .await
        .unwrap();
    assert_eq!(store.binding_count(), 0);

    // The released address is allocatable again
    let ip = alloc.allocate("cid-2").await.unwrap();
    assert_eq!(ip.address, "10.0.1.2/24".parse::<Ipv4Net>().unwrap());
}

#[tokio::test]
async fn concurrent_single_address_pool_has_one_winner() {
    let store = Arc::new(MemoryStore::new());
    store.put_gateway("10.0.1.0/24", "10.0.1.1");
    store.put_pool("default", "10.0.1.2");

    let mut tasks = Vec::new();
    for id in ["A", "B"] {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let alloc = Allocator::new(
                &*store,
                format!("pod-{id}"),
                "default",
                customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
            )
            .await
            .unwrap();
            alloc.allocate(id).await
        }));
    }

    let mut winners = 0;
    let mut exhausted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(ip) => {
                assert_eq!(ip.address, "10.0.1.2/24".parse::<Ipv4Net>().unwrap());
                winners += 1;
            }
            Err(AllocError::Exhausted { .. }) => exhausted += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(exhausted, 1);
    assert_eq!(store.binding_count(), 1);
}

#[tokio::test]
async fn concurrent_allocations_never_collide() {
    let store = Arc::new(MemoryStore::new());
    store.put_gateway("10.0.1.0/24", "10.0.1.1");
    // .1 is the gateway: five usable addresses for seven contenders
    store.put_pool("default", "10.0.1.[1-6]");

    let mut tasks = Vec::new();
    for i in 0..7 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let alloc = Allocator::new(
                &*store,
                format!("pod-{i}"),
                "default",
                customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
            )
            .await
            .unwrap();
            alloc.allocate(&format!("cid-{i}")).await
        }));
    }

    let mut granted = Vec::new();
    let mut exhausted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(ip) => granted.push(ip.address.addr()),
            Err(AllocError::Exhausted { .. }) => exhausted += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(granted.len(), 5);
    assert_eq!(exhausted, 2);

    // Every grant is distinct, in the pool, and never the gateway
    let gateway: std::net::Ipv4Addr = "10.0.1.1".parse().unwrap();
    let mut unique = granted.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), granted.len());
    for ip in &granted {
        assert_ne!(*ip, gateway);
        assert!((2..=6).contains(&ip.octets()[3]), "{ip} outside the pool");
    }
    assert_eq!(store.binding_count(), 5);
}

#[tokio::test]
async fn allocation_respects_namespace_pools() {
    let store = MemoryStore::new();
    store.put_gateway("10.0.1.0/24", "10.0.1.1");
    store.put_pool("default", "10.0.1.[2-3]");
    store.put_pool("other", "10.0.1.[4-5]");

    let alloc_default = Allocator::new(
        &store,
        "web-0",
        "default",
        customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
    )
    .await
    .unwrap();
    let alloc_other = Allocator::new(
        &store,
        "web-1",
        "other",
        customized(&[(SUBNET_KEY, "10.0.1.0/24")]),
    )
    .await
    .unwrap();

    let a = alloc_default.allocate("cid-a").await.unwrap();
    let b = alloc_other.allocate("cid-b").await.unwrap();
    assert_eq!(a.address, "10.0.1.2/24".parse::<Ipv4Net>().unwrap());
    assert_eq!(b.address, "10.0.1.4/24".parse::<Ipv4Net>().unwrap());
}

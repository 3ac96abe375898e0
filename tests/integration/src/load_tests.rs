//! Load tests for xds-cache with 1000+ nodes.
//!
//! These tests verify the system can handle high load scenarios:
//! - 1000+ concurrent watchers
//! - Parallel updates against the same container
//! - Watch cancellation racing update delivery
//!
//! Run with: `cargo test --package integration-tests --test load_tests -- --nocapture`

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;
use xds_cache::{
    Cache, ContainerKey, LinearCache, Request, ResourceCache, ResponseSink, StreamState,
    UpdateResourcesRequest,
};
use xds_core::{AnyResource, BoxResource, Node, TypeUrl};

fn route(name: &str) -> BoxResource {
    AnyResource::from_bytes(TypeUrl::ROUTE, name, name.as_bytes().to_vec()).boxed()
}

/// Concurrent updates of one key leave a single container holding the
/// result of some serial order.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_updates_same_container() {
    let cache = Arc::new(ResourceCache::new());
    let key = ContainerKey::namespace("ns1", TypeUrl::ROUTE);
    let num_writers = 64;
    let barrier = Arc::new(Barrier::new(num_writers));

    let start = Instant::now();
    let mut handles = Vec::with_capacity(num_writers);
    for i in 0..num_writers {
        let cache = cache.clone();
        let key = key.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut update = UpdateResourcesRequest::new();
            update.add_resource(key.clone(), route(&format!("route-{i}")));
            // Every writer also removes the previous writer's shared name.
            update.remove_resource(key, "scratch");
            cache
                .update_resources(&CancellationToken::new(), update)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    println!("{} concurrent updates in {:?}", num_writers, start.elapsed());

    let resources = cache.container_resources(&key).await.unwrap();
    let names: BTreeSet<String> = resources.keys().cloned().collect();
    let expected: BTreeSet<String> = (0..num_writers).map(|i| format!("route-{i}")).collect();
    assert_eq!(names, expected);
    assert_eq!(cache.stats().updates_applied(), num_writers as u64);
}

/// One update answers 1000 pending watchers.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_1000_watchers_fan_out() {
    let cache = ResourceCache::new();
    let num_nodes = 1000;

    let start = Instant::now();
    let mut receivers = Vec::with_capacity(num_nodes);
    for i in 0..num_nodes {
        let (sink, rx) = ResponseSink::channel(1);
        let request = Request::new(Node::new(format!("envoy-sidecar-{i}"), "ns1"), TypeUrl::ROUTE);
        cache
            .create_watch(request, &StreamState::new(), sink)
            .await
            .unwrap();
        receivers.push(rx);
    }
    println!("Opened {} watches in {:?}", num_nodes, start.elapsed());
    assert_eq!(cache.num_watches().await, num_nodes);
    assert_eq!(cache.get_status_keys().await.len(), num_nodes);

    let start = Instant::now();
    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ROUTE, route("default"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();
    println!("Answered {} watches in {:?}", num_nodes, start.elapsed());

    for rx in &mut receivers {
        let response = rx.try_recv().unwrap();
        assert_eq!(response.resource_names(), vec!["default"]);
    }
    assert_eq!(cache.num_watches().await, 0);
    assert_eq!(cache.stats().responses_sent(), num_nodes as u64);
}

/// Cancels racing updates never leave a watch behind or deliver twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_cancel_races_update() {
    let cache = Arc::new(ResourceCache::new());
    let num_watches = 500;

    let mut cancels = Vec::with_capacity(num_watches);
    let mut receivers = Vec::with_capacity(num_watches);
    for i in 0..num_watches {
        let (sink, rx) = ResponseSink::channel(2);
        let request = Request::new(Node::new(format!("node-{i}"), "ns1"), TypeUrl::ROUTE);
        let cancel = cache
            .create_watch(request, &StreamState::new(), sink)
            .await
            .unwrap();
        cancels.push(cancel);
        receivers.push(rx);
    }

    let canceller = tokio::spawn(async move {
        cancels
            .into_iter()
            .map(|cancel| cancel.cancel())
            .filter(|cancelled| *cancelled)
            .count()
    });
    let updater = {
        let cache = cache.clone();
        tokio::spawn(async move {
            let mut update = UpdateResourcesRequest::new();
            update.add_namespace_resource("ns1", TypeUrl::ROUTE, route("r"));
            cache
                .update_resources(&CancellationToken::new(), update)
                .await
                .unwrap();
        })
    };

    let cancelled = canceller.await.unwrap();
    updater.await.unwrap();

    let delivered = receivers
        .iter_mut()
        .map(|rx| {
            let mut count = 0;
            while rx.try_recv().is_ok() {
                count += 1;
            }
            count
        })
        .collect::<Vec<usize>>();
    assert!(delivered.iter().all(|count| *count <= 1));
    let answered: usize = delivered.iter().sum();

    println!("{cancelled} cancelled, {answered} answered");
    assert_eq!(cancelled + answered, num_watches);
    assert_eq!(cache.num_watches().await, 0);
}

/// Linear cache with 1000 named watchers.
#[tokio::test]
async fn test_linear_1000_names() {
    let cache = LinearCache::new(TypeUrl::ENDPOINT);
    let num_names = 1000;

    let mut receivers = Vec::with_capacity(num_names);
    for i in 0..num_names {
        let (sink, rx) = ResponseSink::channel(1);
        let request = Request::new(Node::new("node", "ns1"), TypeUrl::ENDPOINT)
            .with_version("0~0")
            .with_resource_names([format!("ep-{i}")]);
        cache
            .create_watch(request, &StreamState::new(), sink)
            .await
            .unwrap();
        receivers.push(rx);
    }

    let start = Instant::now();
    let upserts = (0..num_names)
        .filter(|i| i % 2 == 0)
        .map(|i| AnyResource::from_bytes(TypeUrl::ENDPOINT, format!("ep-{i}"), vec![1]).boxed())
        .collect();
    cache.update_resources(upserts, Vec::new()).await.unwrap();
    println!("Linear update of {} names in {:?}", num_names / 2, start.elapsed());

    for (i, rx) in receivers.iter_mut().enumerate() {
        assert_eq!(rx.try_recv().is_ok(), i % 2 == 0, "name ep-{i}");
    }
    assert_eq!(cache.num_watches("ep-1"), 1);
    assert_eq!(cache.num_watches("ep-0"), 0);
}

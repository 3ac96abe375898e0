//! Cache integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mesh_xds::prelude::*;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn resource(type_url: &str, name: &str, body: &[u8]) -> BoxResource {
    AnyResource::from_bytes(type_url, name, body.to_vec()).boxed()
}

fn body(resource: &BoxResource) -> Vec<u8> {
    resource.encode().expect("encodable").value
}

#[tokio::test]
async fn end_to_end_cluster_updates() {
    init_tracing();
    let cache = ResourceCache::new();
    let ctx = CancellationToken::new();
    let key = ContainerKey::namespace("ns1", TypeUrl::CLUSTER);
    assert_eq!(key, ContainerKey::cluster("ns1", TlsMode::None));

    let mut update = UpdateResourcesRequest::new();
    update.add_resource(key.clone(), resource(TypeUrl::CLUSTER, "svcA", b"r1"));
    cache.update_resources(&ctx, update).await.unwrap();
    let v1 = cache.container_version(&key).await.unwrap();

    // First request gets everything at once.
    let node = Node::new("envoy-1", "ns1");
    let (sink, mut rx) = ResponseSink::channel(1);
    let cancel = cache
        .create_watch(Request::new(node.clone(), TypeUrl::CLUSTER), &StreamState::new(), sink)
        .await
        .unwrap();
    assert!(cancel.is_noop());
    let response = rx.recv().await.unwrap();
    assert_eq!(response.version, v1.as_str());
    assert_eq!(response.resource_names(), vec!["svcA"]);
    assert_eq!(body(&response.resources[0]), b"r1");

    // Acknowledged version stays open.
    let (sink, mut rx) = ResponseSink::channel(1);
    let request = Request::new(node.clone(), TypeUrl::CLUSTER).with_version(v1.as_str());
    let cancel = cache
        .create_watch(request, &StreamState::new(), sink)
        .await
        .unwrap();
    assert!(!cancel.is_noop());
    assert!(rx.try_recv().is_err());
    assert_eq!(cache.num_watches().await, 1);

    let mut update = UpdateResourcesRequest::new();
    update
        .remove_resource(key.clone(), "svcA")
        .add_resource(key.clone(), resource(TypeUrl::CLUSTER, "svcB", b"r2"));
    cache.update_resources(&ctx, update).await.unwrap();
    let v2 = cache.container_version(&key).await.unwrap();
    assert_ne!(v1, v2);

    let response = rx.recv().await.unwrap();
    assert_eq!(response.version, v2.as_str());
    assert_eq!(response.resource_names(), vec!["svcB"]);
    assert_eq!(body(&response.resources[0]), b"r2");
    assert_eq!(cache.num_watches().await, 0);
}

#[tokio::test]
async fn answered_watch_cannot_be_cancelled() {
    let cache = ResourceCache::new();
    let node = Node::new("envoy-1", "ns1");
    let (sink, mut rx) = ResponseSink::channel(1);

    let cancel = cache
        .create_watch(Request::new(node, TypeUrl::ROUTE), &StreamState::new(), sink)
        .await
        .unwrap();
    let id = cancel.watch_id().unwrap();
    let status = cache
        .status_info(&StatusKey::new("ns1", "envoy-1"))
        .await
        .unwrap();
    assert!(status.has_watch(id));

    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ROUTE, resource(TypeUrl::ROUTE, "r", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();
    rx.recv().await.unwrap();

    assert!(!status.has_watch(id));
    assert!(!cancel.cancel());
    assert!(!cancel.cancel());
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let cache = ResourceCache::new();
    let (sink, _rx) = ResponseSink::channel(1);
    let cancel = cache
        .create_watch(
            Request::new(Node::new("envoy-1", "ns1"), TypeUrl::ENDPOINT),
            &StreamState::new(),
            sink,
        )
        .await
        .unwrap();

    assert!(cancel.cancel());
    assert!(!cancel.clone().cancel());
    assert_eq!(cache.num_watches().await, 0);
}

#[tokio::test]
async fn watches_for_other_versions_are_answered_with_current() {
    let cache = ResourceCache::new();
    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ROUTE, resource(TypeUrl::ROUTE, "r", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();

    let (sink, mut rx) = ResponseSink::channel(1);
    let request = Request::new(Node::new("envoy-1", "ns1"), TypeUrl::ROUTE).with_version("old");
    let cancel = cache
        .create_watch(request, &StreamState::new(), sink)
        .await
        .unwrap();
    assert!(cancel.is_noop());
    assert_eq!(rx.recv().await.unwrap().resource_names(), vec!["r"]);
}

#[tokio::test]
async fn ads_suppresses_partial_responses() {
    init_tracing();
    let cache = ResourceCache::builder().ads(true).build();
    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ENDPOINT, resource(TypeUrl::ENDPOINT, "A", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();

    let (sink, mut rx) = ResponseSink::channel(1);
    let request = Request::new(Node::new("envoy-1", "ns1"), TypeUrl::ENDPOINT)
        .with_resource_names(["A", "B"]);
    let cancel = cache
        .create_watch(request, &StreamState::new(), sink)
        .await
        .unwrap();

    assert!(!cancel.is_noop());
    assert!(rx.try_recv().is_err());
    assert_eq!(cache.num_watches().await, 1);
    assert_eq!(cache.stats().ads_suppressions(), 1);

    // Once the container holds exactly the requested names, it is answered.
    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ENDPOINT, resource(TypeUrl::ENDPOINT, "B", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap().resource_names(), vec!["A", "B"]);
}

#[tokio::test]
async fn ads_answers_exact_requests() {
    let cache = ResourceCache::builder().ads(true).build();
    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ENDPOINT, resource(TypeUrl::ENDPOINT, "A", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();

    let (sink, mut rx) = ResponseSink::channel(1);
    let request =
        Request::new(Node::new("envoy-1", "ns1"), TypeUrl::ENDPOINT).with_resource_names(["A"]);
    let cancel = cache
        .create_watch(request, &StreamState::new(), sink)
        .await
        .unwrap();
    assert!(cancel.is_noop());
    assert_eq!(rx.recv().await.unwrap().resource_names(), vec!["A"]);
}

#[tokio::test]
async fn wildcard_delta_on_empty_container_responds_once() {
    let cache = ResourceCache::new();
    let key = ContainerKey::namespace("ns1", TypeUrl::ENDPOINT);
    let mut update = UpdateResourcesRequest::new();
    update.replace_resources(key, Vec::new());
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();

    let request = DeltaRequest::new(Node::new("envoy-1", "ns1"), TypeUrl::ENDPOINT);
    let mut stream = DeltaStreamState::from_request(&request);
    assert!(stream.is_wildcard());
    let (sink, mut rx) = ResponseSink::channel(2);

    let cancel = cache
        .create_delta_watch(request.clone(), &mut stream, sink.clone())
        .await
        .unwrap();
    assert!(cancel.is_none());
    let response = rx.recv().await.unwrap();
    assert!(response.resources.is_empty());
    assert!(response.removed_resources.is_empty());

    // Nothing changed since: the second request waits.
    let cancel = cache
        .create_delta_watch(request, &mut stream, sink)
        .await
        .unwrap();
    assert!(cancel.is_some());
    assert!(rx.try_recv().is_err());
    assert_eq!(cache.num_delta_watches().await, 1);
}

#[tokio::test]
async fn recorded_baseline_after_update_keeps_next_watch_open() {
    let cache = ResourceCache::new();
    let request = DeltaRequest::new(Node::new("envoy-1", "ns1"), TypeUrl::ENDPOINT);
    let mut stream = DeltaStreamState::from_request(&request);
    let (sink, mut rx) = ResponseSink::channel(2);

    // No container yet: the first wildcard request waits.
    let cancel = cache
        .create_delta_watch(request.clone(), &mut stream, sink.clone())
        .await
        .unwrap();
    assert!(cancel.is_some());

    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ENDPOINT, resource(TypeUrl::ENDPOINT, "a", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();
    let response = rx.recv().await.unwrap();
    assert_eq!(response.resource_names(), vec!["a"]);

    stream.set_resource_versions(response.next_version_map);
    assert!(!stream.is_first());

    let cancel = cache
        .create_delta_watch(request, &mut stream, sink)
        .await
        .unwrap();
    assert!(cancel.is_some());
    assert!(rx.try_recv().is_err());
    assert_eq!(cache.num_delta_watches().await, 1);
}

#[tokio::test]
async fn delta_watch_gets_subscribed_changes_only() {
    let cache = ResourceCache::new();
    let request = DeltaRequest::new(Node::new("envoy-1", "ns1"), TypeUrl::ENDPOINT).subscribe(["a"]);
    let mut stream = DeltaStreamState::from_request(&request);
    let (sink, mut rx) = ResponseSink::channel(2);

    let cancel = cache
        .create_delta_watch(request, &mut stream, sink)
        .await
        .unwrap();
    assert!(cancel.is_some());

    let mut update = UpdateResourcesRequest::new();
    update.add_resources(
        ContainerKey::namespace("ns1", TypeUrl::ENDPOINT),
        vec![
            resource(TypeUrl::ENDPOINT, "a", b"1"),
            resource(TypeUrl::ENDPOINT, "b", b"1"),
        ],
    );
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();

    let response = rx.recv().await.unwrap();
    assert_eq!(response.resource_names(), vec!["a"]);
    assert!(response.next_version_map.contains_key("a"));
    assert!(!response.next_version_map.contains_key("b"));
    assert_eq!(cache.num_delta_watches().await, 0);
}

#[tokio::test]
async fn listeners_and_clusters_are_routed_by_node() {
    let resolver = |node: &Node| {
        let tls = match node.metadata.get("tls").map(String::as_str) {
            Some("strict") => TlsMode::Strict,
            _ => TlsMode::None,
        };
        NodeKey::new(node.cluster.clone(), node.id.clone()).with_tls_mode(tls)
    };
    let cache = ResourceCache::builder().resolver(Arc::new(resolver)).build();

    let mut update = UpdateResourcesRequest::new();
    update
        .add_cluster_resource("ns1", TlsMode::None, resource(TypeUrl::CLUSTER, "plain", b"1"))
        .add_cluster_resource("ns1", TlsMode::Strict, resource(TypeUrl::CLUSTER, "mtls", b"1"))
        .add_listener_resource("n1", resource(TypeUrl::LISTENER, "inbound", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();

    let strict = Node::new("n1", "ns1").with_metadata("tls", "strict");
    let plain = Node::new("n2", "ns1");

    let response = cache
        .fetch(&Request::new(strict.clone(), TypeUrl::CLUSTER))
        .await
        .unwrap();
    assert_eq!(response.resource_names(), vec!["mtls"]);
    let response = cache
        .fetch(&Request::new(plain.clone(), TypeUrl::CLUSTER))
        .await
        .unwrap();
    assert_eq!(response.resource_names(), vec!["plain"]);

    let response = cache
        .fetch(&Request::new(strict, TypeUrl::LISTENER))
        .await
        .unwrap();
    assert_eq!(response.resource_names(), vec!["inbound"]);
    let err = cache
        .fetch(&Request::new(plain, TypeUrl::LISTENER))
        .await
        .unwrap_err();
    assert!(matches!(err, XdsError::MissingSnapshot { .. }));
}

#[tokio::test]
async fn fetch_skips_current_requesters() {
    let cache = ResourceCache::new();
    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::SECRET, resource(TypeUrl::SECRET, "cert", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();

    let node = Node::new("envoy-1", "ns1");
    let response = cache
        .fetch(&Request::new(node.clone(), TypeUrl::SECRET))
        .await
        .unwrap();
    let err = cache
        .fetch(&Request::new(node, TypeUrl::SECRET).with_version(response.version))
        .await
        .unwrap_err();
    assert!(err.is_skip());
    assert_eq!(cache.stats().fetch_hits(), 1);
    assert_eq!(cache.stats().fetch_skips(), 1);
}

#[tokio::test]
async fn get_resources_returns_a_copy() {
    let cache = ResourceCache::new();
    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ROUTE, resource(TypeUrl::ROUTE, "r", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();

    let mut copy = cache.get_resources(&TypeUrl::new(TypeUrl::ROUTE), "ns1", "any").await;
    copy.clear();
    let again = cache.get_resources(&TypeUrl::new(TypeUrl::ROUTE), "ns1", "any").await;
    assert_eq!(again.len(), 1);
    assert!(cache
        .get_resources(&TypeUrl::new(TypeUrl::ROUTE), "ns2", "any")
        .await
        .is_empty());
}

struct Inbound {
    builds: AtomicUsize,
}

#[async_trait]
impl ResourceBuilder for Inbound {
    async fn build(&self, node: &NodeKey) -> XdsResult<UpdateResourcesRequest> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let mut update = UpdateResourcesRequest::new();
        update.add_listener_resource(
            node.node_id.clone(),
            resource(TypeUrl::LISTENER, "inbound", node.node_id.as_bytes()),
        );
        Ok(update)
    }
}

#[tokio::test]
async fn on_demand_build_and_eviction() {
    init_tracing();
    let builder = Arc::new(Inbound {
        builds: AtomicUsize::new(0),
    });
    let nodes = Arc::new(NodeManager::new());
    let hook = Arc::new(OnDemandHook::new(
        Arc::new(DefaultNodeResolver),
        builder.clone(),
        nodes.clone(),
    ));
    let cache = Arc::new(ResourceCache::builder().hook(hook.clone()).build());
    assert!(hook.attach(&cache));
    let cleanup = NodeCleanup::new(Arc::new(DefaultNodeResolver), nodes.clone(), cache.clone());

    let node = Node::new("n1", "ns1");
    cleanup.on_stream_open(1, &node).await;

    // The first request of the node sees the resources built for it.
    let (sink, mut rx) = ResponseSink::channel(1);
    let cancel = cache
        .create_watch(Request::new(node.clone(), TypeUrl::LISTENER), &StreamState::new(), sink)
        .await
        .unwrap();
    assert!(cancel.is_noop());
    let response = rx.recv().await.unwrap();
    assert_eq!(response.resource_names(), vec!["inbound"]);
    assert_eq!(body(&response.resources[0]), b"n1");

    let (sink, _rx) = ResponseSink::channel(1);
    cache
        .create_watch(Request::new(node.clone(), TypeUrl::ROUTE), &StreamState::new(), sink)
        .await
        .unwrap();
    assert_eq!(builder.builds.load(Ordering::SeqCst), 1);

    cleanup.on_stream_closed(1, &node).await;
    assert!(cache.get_status_keys().await.is_empty());
    assert!(cache
        .container_resources(&ContainerKey::listener("n1"))
        .await
        .is_none());

    // A reconnecting node is built again.
    cache.fetch(&Request::new(node, TypeUrl::LISTENER)).await.unwrap();
    assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn closed_subscriber_loses_its_watch() {
    let cache = ResourceCache::new();
    let (sink, rx) = ResponseSink::channel(1);
    cache
        .create_watch(
            Request::new(Node::new("envoy-1", "ns1"), TypeUrl::ROUTE),
            &StreamState::new(),
            sink,
        )
        .await
        .unwrap();
    drop(rx);

    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ROUTE, resource(TypeUrl::ROUTE, "r", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();
    assert_eq!(cache.num_watches().await, 0);
    assert_eq!(cache.stats().responses_sent(), 0);
}

#[tokio::test]
async fn cancelled_stream_keeps_its_watch() {
    let cache = ResourceCache::new();
    let stream = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    let sink = ResponseSink::new(tx, stream.clone());

    cache
        .create_watch(
            Request::new(Node::new("envoy-1", "ns1"), TypeUrl::ROUTE),
            &StreamState::new(),
            sink,
        )
        .await
        .unwrap();
    stream.cancel();

    let mut update = UpdateResourcesRequest::new();
    update.add_namespace_resource("ns1", TypeUrl::ROUTE, resource(TypeUrl::ROUTE, "r", b"1"));
    cache
        .update_resources(&CancellationToken::new(), update)
        .await
        .unwrap();
    assert_eq!(cache.num_watches().await, 1);
    assert!(rx.try_recv().is_err());
}

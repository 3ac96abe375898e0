//! Linear cache integration tests.

use mesh_xds::prelude::*;

fn endpoint(name: &str, body: &[u8]) -> BoxResource {
    AnyResource::from_bytes(TypeUrl::ENDPOINT, name, body.to_vec()).boxed()
}

fn request(node: &str, version: &str, names: &[&str]) -> Request {
    Request::new(Node::new(node, "ns1"), TypeUrl::ENDPOINT)
        .with_version(version)
        .with_resource_names(names.iter().copied())
}

fn knowing(names: &[&str]) -> StreamState {
    let mut stream = StreamState::new();
    stream.set_known_resource_names(TypeUrl::new(TypeUrl::ENDPOINT), names.iter().copied());
    stream
}

#[tokio::test]
async fn one_response_per_sink() {
    let cache = LinearCache::builder(TypeUrl::ENDPOINT)
        .version_prefix("eds-")
        .build();
    let version = cache.version_for("n1").await;
    assert_eq!(version, "eds-0~0");

    let (sink, mut rx) = ResponseSink::channel(4);
    let x = cache
        .create_watch(request("n1", &version, &["x"]), &StreamState::new(), sink.clone())
        .await
        .unwrap();
    let y = cache
        .create_watch(request("n1", &version, &["y"]), &StreamState::new(), sink)
        .await
        .unwrap();
    assert_ne!(x.watch_id(), y.watch_id());

    cache
        .update_resources(vec![endpoint("x", b"1"), endpoint("y", b"1")], Vec::new())
        .await
        .unwrap();

    let response = rx.recv().await.unwrap();
    assert_eq!(response.resource_names(), vec!["x", "y"]);
    assert_eq!(response.request.resource_names, vec!["x", "y"]);
    assert_eq!(response.version, "eds-1~0");
    assert!(rx.try_recv().is_err());

    // Both watches were consumed by the one response.
    assert!(!x.cancel());
    assert!(!y.cancel());
    assert_eq!(cache.stats().responses_sent(), 1);
}

#[tokio::test]
async fn distinct_sinks_each_get_a_response() {
    let cache = LinearCache::new(TypeUrl::ENDPOINT);
    let (first, mut rx1) = ResponseSink::channel(1);
    let (second, mut rx2) = ResponseSink::channel(1);

    cache
        .create_watch(request("n1", "0~0", &["x"]), &StreamState::new(), first)
        .await
        .unwrap();
    cache
        .create_watch(request("n2", "0~0", &["x"]), &StreamState::new(), second)
        .await
        .unwrap();
    cache.update_resource(endpoint("x", b"1")).await.unwrap();

    assert_eq!(rx1.recv().await.unwrap().resource_names(), vec!["x"]);
    assert_eq!(rx2.recv().await.unwrap().resource_names(), vec!["x"]);
    assert_eq!(cache.num_watches("x"), 0);
}

#[tokio::test]
async fn unrelated_changes_leave_watches_open() {
    let cache = LinearCache::builder(TypeUrl::ENDPOINT)
        .initial_resources(vec![endpoint("a", b"1"), endpoint("b", b"1")])
        .build();
    let (sink, mut rx) = ResponseSink::channel(1);

    cache
        .create_watch(request("n1", "0~0", &["a"]), &knowing(&["a"]), sink)
        .await
        .unwrap();
    cache.update_resource(endpoint("b", b"2")).await.unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(cache.num_watches("a"), 1);

    // A requester holding version 1 is still current for "a".
    let (sink, mut rx2) = ResponseSink::channel(1);
    let cancel = cache
        .create_watch(request("n1", "1~0", &["a"]), &knowing(&["a"]), sink)
        .await
        .unwrap();
    assert!(!cancel.is_noop());
    assert!(rx2.try_recv().is_err());

    cache.delete_resource("a").await.unwrap();
    assert!(rx.recv().await.unwrap().resources.is_empty());
    assert!(rx2.recv().await.unwrap().resources.is_empty());
}

#[tokio::test]
async fn malformed_versions_are_fully_stale() {
    let cache = LinearCache::builder(TypeUrl::ENDPOINT)
        .version_prefix("eds-")
        .initial_resources(vec![endpoint("a", b"1"), endpoint("b", b"1")])
        .build();

    for version in ["", "eds-", "eds-1", "v-0~0", "eds-0~x", "eds-x~0"] {
        let (sink, mut rx) = ResponseSink::channel(1);
        let cancel = cache
            .create_watch(request("n1", version, &[]), &StreamState::new(), sink)
            .await
            .unwrap();
        assert!(cancel.is_noop(), "version {version:?} should be stale");
        assert_eq!(rx.recv().await.unwrap().resource_names(), vec!["a", "b"]);
    }
}

#[tokio::test]
async fn node_overrides_layer_over_shared() {
    let cache = LinearCache::builder(TypeUrl::ENDPOINT)
        .initial_resources(vec![endpoint("a", b"shared"), endpoint("b", b"shared")])
        .build();
    cache
        .update_node_resources("n1", vec![endpoint("a", b"mine")], Vec::new())
        .await
        .unwrap();

    let n1 = cache
        .fetch(&request("n1", "", &[]))
        .await
        .unwrap();
    assert_eq!(n1.version, "0~1");
    let bodies: Vec<Vec<u8>> = n1
        .resources
        .iter()
        .map(|r| r.encode().unwrap().value)
        .collect();
    assert_eq!(bodies, vec![b"mine".to_vec(), b"shared".to_vec()]);

    let n2 = cache.fetch(&request("n2", "", &["a"])).await.unwrap();
    assert_eq!(n2.version, "0~0");
    assert_eq!(n2.resources[0].encode().unwrap().value, b"shared");

    // Shared updates reach every node, override or not.
    let (sink1, mut rx1) = ResponseSink::channel(1);
    let (sink2, mut rx2) = ResponseSink::channel(1);
    cache
        .create_watch(request("n1", "0~1", &[]), &StreamState::new(), sink1)
        .await
        .unwrap();
    cache
        .create_watch(request("n2", "0~0", &[]), &StreamState::new(), sink2)
        .await
        .unwrap();
    cache.update_resource(endpoint("c", b"shared")).await.unwrap();
    assert_eq!(rx1.recv().await.unwrap().version, "1~1");
    assert_eq!(rx2.recv().await.unwrap().version, "1~0");

    assert!(cache.delete_node("n1").await);
    assert!(!cache.delete_node("n1").await);
    assert_eq!(cache.version_for("n1").await, "1~2");
}

#[tokio::test]
async fn delta_subscribers_follow_overrides() {
    let cache = LinearCache::builder(TypeUrl::ENDPOINT)
        .initial_resources(vec![endpoint("a", b"shared")])
        .build();
    let request = DeltaRequest::new(Node::new("n1", "ns1"), TypeUrl::ENDPOINT);
    let mut stream = DeltaStreamState::from_request(&request);
    let (sink, mut rx) = ResponseSink::channel(2);

    let cancel = cache
        .create_delta_watch(request.clone(), &mut stream, sink.clone())
        .await
        .unwrap();
    assert!(cancel.is_none());
    assert_eq!(rx.recv().await.unwrap().resource_names(), vec!["a"]);

    let cancel = cache
        .create_delta_watch(request.clone(), &mut stream, sink.clone())
        .await
        .unwrap();
    assert!(cancel.is_some());
    assert_eq!(cache.num_delta_watches(), 1);

    cache
        .update_node_resources("n1", vec![endpoint("a", b"mine")], Vec::new())
        .await
        .unwrap();
    let response = rx.recv().await.unwrap();
    assert_eq!(response.resources[0].encode().unwrap().value, b"mine");
    assert_eq!(response.system_version, "0~1");
    assert_eq!(cache.num_delta_watches(), 0);

    // Once the delivered hashes are recorded, nothing is pending.
    stream.set_resource_versions(response.next_version_map);
    let cancel = cache
        .create_delta_watch(request, &mut stream, sink)
        .await
        .unwrap();
    assert!(cancel.is_some());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn wildcard_counts() {
    let cache = LinearCache::new(TypeUrl::ENDPOINT);
    let (sink, _rx) = ResponseSink::channel(1);
    let cancel = cache
        .create_watch(request("n1", "0~0", &[]), &StreamState::new(), sink)
        .await
        .unwrap();
    assert_eq!(cache.num_wildcard_watches(), 1);
    assert!(cancel.cancel());
    assert_eq!(cache.num_wildcard_watches(), 0);
    assert_eq!(cache.num_resources().await, 0);
    assert!(cache.get_resources().await.is_empty());
}

//! Delta computation for incremental subscribers.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;
use xds_core::{BoxResource, XdsResult};

use crate::discovery::{DeltaRequest, DeltaResponse};
use crate::stream::DeltaStreamState;
use crate::watch::{ResponseSink, WatchId};

/// Resources of a container together with their content hashes.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DeltaView<'a> {
    pub(crate) resources: &'a HashMap<String, BoxResource>,
    pub(crate) versions: &'a HashMap<String, String>,
    pub(crate) system_version: &'a str,
}

/// What a subscriber is missing relative to a container.
#[derive(Debug, Default)]
pub(crate) struct DeltaChanges {
    pub(crate) resources: Vec<BoxResource>,
    pub(crate) removed: Vec<String>,
    pub(crate) next_version_map: HashMap<String, String>,
}

impl DeltaChanges {
    fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.removed.is_empty()
    }
}

/// Compare a container against what the subscriber acknowledged.
///
/// Wildcard subscribers get every resource whose hash they do not hold and
/// lose every acknowledged name the container dropped. Explicit subscribers
/// are only compared on their subscribed names.
pub(crate) fn compute_delta(view: DeltaView<'_>, state: &DeltaStreamState) -> DeltaChanges {
    let known = state.resource_versions();
    let mut changes = DeltaChanges::default();

    if state.is_wildcard() {
        for (name, resource) in view.resources {
            let Some(version) = view.versions.get(name) else {
                continue;
            };
            if known.get(name) != Some(version) {
                changes.resources.push(resource.clone());
            }
            changes.next_version_map.insert(name.clone(), version.clone());
        }
        changes.removed = known
            .keys()
            .filter(|name| !view.resources.contains_key(*name))
            .cloned()
            .collect();
    } else {
        for name in state.subscribed_resource_names() {
            match (view.resources.get(name), view.versions.get(name)) {
                (Some(resource), Some(version)) => {
                    if known.get(name) != Some(version) {
                        changes.resources.push(resource.clone());
                    }
                    changes.next_version_map.insert(name.clone(), version.clone());
                }
                _ if known.contains_key(name) => changes.removed.push(name.clone()),
                _ => {}
            }
        }
    }

    changes.resources.sort_by(|a, b| a.name().cmp(b.name()));
    changes.removed.sort();
    changes
}

/// Build the response a subscriber needs, if any.
///
/// A response is due when something changed, and always for the first
/// response of a wildcard subscription.
pub(crate) fn prepare_delta(
    view: DeltaView<'_>,
    request: &DeltaRequest,
    state: &DeltaStreamState,
) -> Option<DeltaResponse> {
    let changes = compute_delta(view, state);
    if changes.is_empty() && !(state.is_wildcard() && state.is_first()) {
        trace!(
            type_url = %request.type_url,
            node = %request.node.id,
            "delta subscriber is current"
        );
        return None;
    }

    Some(DeltaResponse {
        request: request.clone(),
        resources: changes.resources,
        removed_resources: changes.removed,
        next_version_map: changes.next_version_map,
        system_version: view.system_version.to_string(),
    })
}

/// Deliver a prepared response and make it the subscriber's new baseline.
pub(crate) async fn send_delta(
    response: DeltaResponse,
    state: &mut DeltaStreamState,
    sink: &ResponseSink<DeltaResponse>,
    watch_id: WatchId,
    ctx: Option<&CancellationToken>,
    slow_send_threshold: Duration,
) -> XdsResult<DeltaResponse> {
    trace!(
        type_url = %response.request.type_url,
        node = %response.request.node.id,
        resources = response.resources.len(),
        removed = response.removed_resources.len(),
        "sending delta response"
    );
    sink.deliver(response.clone(), watch_id, ctx, slow_send_threshold)
        .await?;
    state.set_resource_versions(response.next_version_map.clone());
    Ok(response)
}

/// Compute and send the delta for one subscriber.
///
/// Returns the sent response, or `None` if the subscriber was current.
pub(crate) async fn respond_delta(
    view: DeltaView<'_>,
    request: &DeltaRequest,
    state: &mut DeltaStreamState,
    sink: &ResponseSink<DeltaResponse>,
    watch_id: WatchId,
    ctx: Option<&CancellationToken>,
    slow_send_threshold: Duration,
) -> XdsResult<Option<DeltaResponse>> {
    match prepare_delta(view, request, state) {
        Some(response) => {
            send_delta(response, state, sink, watch_id, ctx, slow_send_threshold)
                .await
                .map(Some)
        }
        None => Ok(None),
    }
}

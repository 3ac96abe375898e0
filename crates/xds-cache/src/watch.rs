//! Watch identifiers, response sinks and cancellation handles.
//!
//! A watch is a one-shot promise to answer a discovery request. The cache
//! stores the request together with a [`ResponseSink`] and hands the caller
//! a [`CancelWatch`] that removes the watch again if it is still pending.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use xds_core::{XdsError, XdsResult};

/// Unique identifier for a watch within one cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl WatchId {
    /// Id used for responses that are sent without registering a watch.
    pub const UNASSIGNED: WatchId = WatchId(0);

    /// Get the numeric value of this watch ID.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Mints watch ids for one cache instance. Ids are never reused.
#[derive(Debug)]
pub(crate) struct WatchIdGenerator(AtomicU64);

impl Default for WatchIdGenerator {
    fn default() -> Self {
        Self(AtomicU64::new(1))
    }
}

impl WatchIdGenerator {
    pub(crate) fn next(&self) -> WatchId {
        WatchId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// The sending half of a subscriber's response channel.
///
/// Pairs a bounded channel with the cancellation token of the stream that
/// owns it. Cancelling the token aborts a send that is waiting for channel
/// capacity; nothing else does.
pub struct ResponseSink<T> {
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
}

impl<T> Clone for ResponseSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> fmt::Debug for ResponseSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSink")
            .field("capacity", &self.tx.capacity())
            .field("closed", &self.tx.is_closed())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<T: Send> ResponseSink<T> {
    /// Wrap an existing sender and its stream's cancellation token.
    pub fn new(tx: mpsc::Sender<T>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Create a sink with a fresh channel and token.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx, CancellationToken::new()), rx)
    }

    /// The stream cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both sinks feed the same channel.
    pub fn same_sink(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Deliver a response.
    ///
    /// Tries a non-blocking send first. When the channel is full, waits for
    /// capacity until the stream token or the optional caller token is
    /// cancelled. The caller may be holding the cache lock while this runs.
    pub(crate) async fn deliver(
        &self,
        value: T,
        watch_id: WatchId,
        ctx: Option<&CancellationToken>,
        slow_send_threshold: Duration,
    ) -> XdsResult<()> {
        if self.cancel.is_cancelled() || ctx.is_some_and(CancellationToken::is_cancelled) {
            return Err(XdsError::cancelled(format!("send for {watch_id}")));
        }

        let value = match self.tx.try_send(value) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return Err(XdsError::WatchClosed {
                    watch_id: watch_id.as_u64(),
                })
            }
            Err(mpsc::error::TrySendError::Full(value)) => value,
        };

        trace!(watch_id = %watch_id, "response sink full, waiting for capacity");
        let started = Instant::now();
        let caller_cancelled = async {
            match ctx {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(XdsError::cancelled(format!("send for {watch_id}"))),
            _ = caller_cancelled => Err(XdsError::cancelled(format!("send for {watch_id}"))),
            sent = self.tx.send(value) => sent.map_err(|_| XdsError::WatchClosed {
                watch_id: watch_id.as_u64(),
            }),
        };

        let waited = started.elapsed();
        if waited >= slow_send_threshold {
            warn!(
                watch_id = %watch_id,
                waited_ms = waited.as_millis() as u64,
                "slow subscriber held the cache while a response was delivered"
            );
        }
        result
    }
}

/// Something that owns pending watches and can drop one by id.
///
/// Implementations take only their own inner lock, never the cache lock.
pub(crate) trait WatchRegistry: Send + Sync {
    /// Remove the watch if it is still pending. Returns whether it was.
    fn remove_watch(&self, id: WatchId) -> bool;
}

/// Handle that cancels a pending watch.
///
/// Cancelling is idempotent and is a no-op once the watch was answered or
/// its registry was dropped.
#[derive(Clone)]
pub struct CancelWatch {
    target: Option<(Weak<dyn WatchRegistry>, WatchId)>,
}

impl CancelWatch {
    /// A handle for a request that was answered immediately.
    pub fn noop() -> Self {
        Self { target: None }
    }

    pub(crate) fn new<R: WatchRegistry + 'static>(registry: &Arc<R>, id: WatchId) -> Self {
        let weak: Weak<R> = Arc::downgrade(registry);
        Self {
            target: Some((weak as Weak<dyn WatchRegistry>, id)),
        }
    }

    /// Remove the watch if it is still pending.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn cancel(&self) -> bool {
        let Some((registry, id)) = &self.target else {
            return false;
        };
        let Some(registry) = registry.upgrade() else {
            return false;
        };
        let removed = registry.remove_watch(*id);
        if removed {
            debug!(watch_id = %id, "cancelled watch");
        }
        removed
    }

    /// Id of the watch this handle cancels, `None` for a no-op handle.
    pub fn watch_id(&self) -> Option<WatchId> {
        self.target.as_ref().map(|(_, id)| *id)
    }

    /// Whether no watch was registered.
    pub fn is_noop(&self) -> bool {
        self.target.is_none()
    }
}

impl fmt::Debug for CancelWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelWatch")
            .field("watch_id", &self.watch_id())
            .finish()
    }
}

//! Request/response multiplexer over one transport.
//!
//! # Event Loop
//!
//! Each bridge spawns one tokio task that owns the inbound receiver and
//! handles:
//!
//! - Inbound requests: validated, dispatched to the local table, answered
//! - Inbound responses: matched to pending calls by `id`
//! - In-flight handler futures, polled inside the same task
//! - Close commands from the owning controller
//!
//! Handlers never run on another thread, so one context stays single
//! threaded and cooperative. A handler that panics is answered with
//! `handler_failed` and the loop keeps going.
//!
//! # Teardown
//!
//! | Cause | Pending calls fail with | In-flight handlers |
//! |-------|------------------------|--------------------|
//! | Transport ended | [`Error::ConnectionClosed`] | Dropped |
//! | [`Bridge::close`] | The given [`CloseReason`] | Drained for the grace period |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RequestCounter, RequestId};
use crate::protocol::{
    Message, Payload, Request, Response, RpcFault, Salvaged, Transferable, salvage_id,
};
use crate::transport::{Envelope, Inbound, MessageSink, Transport};

use super::table::MethodTable;

// ============================================================================
// Constants
// ============================================================================

/// Maximum outbound calls awaiting a response before new ones are rejected.
pub const MAX_PENDING_CALLS: usize = 1024;

/// Default time in-flight handlers get to finish on a graceful close.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Payload>>>;

/// A running inbound handler, resolved with the ID it answers.
type InFlight = BoxFuture<'static, (RequestId, std::result::Result<Payload, RpcFault>)>;

// ============================================================================
// CloseReason
// ============================================================================

/// Why a bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The transport ended underneath the bridge.
    ChannelClosed,
    /// The owning controller destroyed the context.
    ContextTerminated,
}

impl CloseReason {
    /// Error handed to calls that were still pending.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self {
            Self::ChannelClosed => Error::ConnectionClosed,
            Self::ContextTerminated => Error::ContextTerminated,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelClosed => f.write_str("channel closed"),
            Self::ContextTerminated => f.write_str("context terminated"),
        }
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// Pending outbound calls plus the close flag, guarded together so a call
/// can never be registered after the map was drained.
#[derive(Default)]
struct PendingCalls {
    calls: CorrelationMap,
    closed: Option<CloseReason>,
}

/// State shared by bridge handles and the event loop.
struct Shared {
    sink: Arc<dyn MessageSink>,
    pending: Mutex<PendingCalls>,
    counter: RequestCounter,
    closed_tx: watch::Sender<Option<CloseReason>>,
    /// Set once the event loop has closed the sink.
    finished_tx: watch::Sender<bool>,
}

impl Shared {
    /// Marks the bridge closed and rejects every pending call.
    ///
    /// The first reason wins; later calls only drain stragglers.
    fn fail_pending(&self, reason: CloseReason) {
        let (reason, pending) = {
            let mut pending = self.pending.lock();
            let reason = *pending.closed.get_or_insert(reason);
            let drained: Vec<_> = pending.calls.drain().collect();
            (reason, drained)
        };

        let count = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(reason.into_error()));
        }

        if count > 0 {
            debug!(count, %reason, "Failed pending calls");
        }

        self.closed_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

// ============================================================================
// BridgeCommand
// ============================================================================

/// Internal commands for the event loop.
enum BridgeCommand {
    /// Stop reading, drain handlers, close the sink.
    Close { grace: Duration },
}

// ============================================================================
// Bridge
// ============================================================================

/// One end of a wRpc bridge.
///
/// Cloning yields another handle to the same bridge.
///
/// # Thread Safety
///
/// `Bridge` is `Send + Sync`; any task may issue calls concurrently.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<BridgeCommand>,
    shutdown_grace: Duration,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("pending", &self.pending_count())
            .field("closed", &self.close_reason())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Starts a bridge over `transport`, answering calls from `table`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(transport: Transport, table: Arc<dyn MethodTable>) -> Self {
        Self::with_shutdown_grace(transport, table, DEFAULT_SHUTDOWN_GRACE)
    }

    /// Like [`new`](Self::new) with a custom drain period for [`close`](Self::close).
    pub fn with_shutdown_grace(
        transport: Transport,
        table: Arc<dyn MethodTable>,
        shutdown_grace: Duration,
    ) -> Self {
        let (sink, inbound) = transport.split();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(None);
        let (finished_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            sink,
            pending: Mutex::new(PendingCalls::default()),
            counter: RequestCounter::new(),
            closed_tx,
            finished_tx,
        });

        let declared: FxHashSet<&'static str> = table.methods().into_iter().collect();
        debug!(methods = declared.len(), "Bridge started");

        let event_loop = EventLoop {
            shared: Arc::clone(&shared),
            table,
            declared,
            in_flight: FuturesUnordered::new(),
        };
        tokio::spawn(event_loop.run(inbound, command_rx));

        Self {
            shared,
            command_tx,
            shutdown_grace,
        }
    }

    /// Calls a method declared by the remote side.
    ///
    /// Not time-boxed; see [`execute_with_timeout`](Self::execute_with_timeout).
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the remote handler answered with a fault
    /// - [`Error::ConnectionClosed`] if the transport ended first
    /// - [`Error::ContextTerminated`] if the bridge was closed first
    /// - [`Error::Protocol`] if too many calls are pending
    pub async fn execute(&self, method: &str, param: Payload) -> Result<Payload> {
        let (_, response_rx) = self.begin(method, param)?;
        self.finish(response_rx.await)
    }

    /// Calls a remote method, giving up after `deadline`.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute), plus [`Error::RequestTimeout`].
    pub async fn execute_with_timeout(
        &self,
        method: &str,
        param: Payload,
        deadline: Duration,
    ) -> Result<Payload> {
        let (request_id, response_rx) = self.begin(method, param)?;

        match timeout(deadline, response_rx).await {
            Ok(received) => self.finish(received),
            Err(_) => {
                self.shared.pending.lock().calls.remove(&request_id);
                debug!(%request_id, method, "Removed timed-out call");
                Err(Error::request_timeout(
                    request_id,
                    deadline.as_millis() as u64,
                ))
            }
        }
    }

    /// Returns the number of calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().calls.len()
    }

    /// Returns `true` once the bridge stopped accepting calls.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_reason().is_some()
    }

    /// Returns why the bridge closed, if it did.
    #[inline]
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.pending.lock().closed
    }

    /// Closes the bridge.
    ///
    /// Pending calls are rejected with `reason` immediately. Inbound
    /// handlers already running get the shutdown grace period to answer
    /// before the transport closes. Closing twice is a no-op.
    pub fn close(&self, reason: CloseReason) {
        self.shared.fail_pending(reason);
        let _ = self.command_tx.send(BridgeCommand::Close {
            grace: self.shutdown_grace,
        });
    }

    /// Resolves once the bridge is closed, with the reason.
    pub async fn closed(&self) -> CloseReason {
        let mut closed_rx = self.shared.closed_tx.subscribe();
        match closed_rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(CloseReason::ChannelClosed),
            Err(_) => CloseReason::ChannelClosed,
        }
    }

    /// Resolves once the event loop has stopped and the transport is closed.
    ///
    /// Responses of handlers drained during a graceful close are posted
    /// before this resolves.
    pub async fn finished(&self) {
        let mut finished_rx = self.shared.finished_tx.subscribe();
        let _ = finished_rx.wait_for(|finished| *finished).await;
    }

    /// Registers a pending call and posts the request.
    fn begin(
        &self,
        method: &str,
        param: Payload,
    ) -> Result<(RequestId, oneshot::Receiver<Result<Payload>>)> {
        let request_id = self.shared.counter.next();
        let Payload {
            value,
            transferables,
        } = param;
        let message = Message::Request(Request::new(request_id, method, value)).into_value()?;

        let (response_tx, response_rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            if let Some(reason) = pending.closed {
                return Err(reason.into_error());
            }
            if pending.calls.len() >= MAX_PENDING_CALLS {
                warn!(
                    pending = pending.calls.len(),
                    max = MAX_PENDING_CALLS,
                    "Too many pending calls"
                );
                return Err(Error::protocol(format!(
                    "Too many pending calls: {}/{}",
                    pending.calls.len(),
                    MAX_PENDING_CALLS
                )));
            }
            pending.calls.insert(request_id, response_tx);
        }

        if let Err(e) = self
            .shared
            .sink
            .post(Envelope::new(message, transferables))
        {
            self.shared.pending.lock().calls.remove(&request_id);
            return Err(e);
        }

        trace!(%request_id, method, "Request sent");
        Ok((request_id, response_rx))
    }

    /// Maps a dropped response channel to the close reason.
    fn finish(
        &self,
        received: std::result::Result<Result<Payload>, oneshot::error::RecvError>,
    ) -> Result<Payload> {
        match received {
            Ok(result) => result,
            Err(_) => Err(self
                .close_reason()
                .unwrap_or(CloseReason::ChannelClosed)
                .into_error()),
        }
    }
}

// ============================================================================
// EventLoop
// ============================================================================

/// State owned by the bridge task.
struct EventLoop {
    shared: Arc<Shared>,
    table: Arc<dyn MethodTable>,
    declared: FxHashSet<&'static str>,
    in_flight: FuturesUnordered<InFlight>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut inbound: Inbound,
        mut command_rx: mpsc::UnboundedReceiver<BridgeCommand>,
    ) {
        let grace = loop {
            tokio::select! {
                envelope = inbound.recv() => {
                    match envelope {
                        Some(envelope) => self.handle_envelope(envelope),
                        None => {
                            debug!("Transport ended");
                            self.shared.fail_pending(CloseReason::ChannelClosed);
                            break None;
                        }
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(BridgeCommand::Close { grace }) => break Some(grace),
                        None => {
                            debug!("All bridge handles dropped");
                            self.shared.fail_pending(CloseReason::ContextTerminated);
                            break Some(DEFAULT_SHUTDOWN_GRACE);
                        }
                    }
                }

                Some((request_id, result)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    post_response(self.shared.sink.as_ref(), request_id, result);
                }
            }
        };

        if let Some(grace) = grace {
            self.drain(grace).await;
        } else if !self.in_flight.is_empty() {
            debug!(count = self.in_flight.len(), "Dropping in-flight handlers");
        }

        self.shared.sink.close();
        self.shared.finished_tx.send_replace(true);
        debug!("Bridge event loop terminated");
    }

    /// Lets running handlers answer before the sink closes.
    async fn drain(&mut self, grace: Duration) {
        if self.in_flight.is_empty() {
            return;
        }

        let sink = self.shared.sink.as_ref();
        let in_flight = &mut self.in_flight;
        let drained = timeout(grace, async {
            while let Some((request_id, result)) = in_flight.next().await {
                post_response(sink, request_id, result);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                abandoned = self.in_flight.len(),
                "Handlers did not finish within shutdown grace"
            );
        }
    }

    /// Validates and routes one inbound message.
    fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope {
            payload,
            transferables,
        } = envelope;
        let salvaged = salvage_id(&payload);

        match Message::from_value(payload) {
            Ok(Message::Request(request)) => self.dispatch(request, transferables),
            Ok(Message::Response(response)) => self.resolve(response, transferables),
            Err(e) => match salvaged {
                Some(Salvaged::Request(request_id)) => {
                    warn!(%request_id, error = %e, "Rejecting malformed request");
                    post_response(self.shared.sink.as_ref(), request_id, Err(e.into()));
                }
                Some(Salvaged::Response(request_id)) => {
                    let response_tx = self.shared.pending.lock().calls.remove(&request_id);
                    match response_tx {
                        Some(tx) => {
                            warn!(%request_id, error = %e, "Failing call on malformed response");
                            let _ = tx.send(Err(e));
                        }
                        None => warn!(%request_id, error = %e, "Dropping malformed response"),
                    }
                }
                None => warn!(error = %e, "Dropping malformed message"),
            },
        }
    }

    /// Starts the local handler for a request.
    fn dispatch(&mut self, request: Request, transferables: Vec<Transferable>) {
        let Request { id, method, param } = request;

        if !self.declared.contains(method.as_str()) {
            warn!(request_id = %id, %method, "Request for undeclared method");
            post_response(
                self.shared.sink.as_ref(),
                id,
                Err(RpcFault::unknown_method(&method)),
            );
            return;
        }

        trace!(request_id = %id, %method, "Dispatching request");

        let handler = self.table.call(&method, Payload::transfer(param, transferables));
        self.in_flight.push(
            async move {
                let result = AssertUnwindSafe(handler)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(RpcFault::handler_failed(&method, "handler panicked")));
                (id, result)
            }
            .boxed(),
        );
    }

    /// Completes the pending call a response belongs to.
    fn resolve(&self, response: Response, transferables: Vec<Transferable>) {
        let request_id = response.id;
        let response_tx = self.shared.pending.lock().calls.remove(&request_id);

        match response_tx {
            Some(tx) => {
                let result = response
                    .into_result()
                    .map(|value| Payload::transfer(value, transferables));
                let _ = tx.send(result);
                trace!(%request_id, "Response matched");
            }
            None => warn!(%request_id, "Response for unknown request"),
        }
    }
}

/// Posts a response. An undeliverable response only means the caller is gone.
fn post_response(
    sink: &dyn MessageSink,
    request_id: RequestId,
    result: std::result::Result<Payload, RpcFault>,
) {
    let (response, transferables) = match result {
        Ok(payload) => (Response::success(request_id, payload.value), payload.transferables),
        Err(fault) => {
            debug!(%request_id, code = %fault.code, "Answering with fault");
            (Response::failure(request_id, fault), Vec::new())
        }
    };

    let message = match Message::Response(response).into_value() {
        Ok(message) => message,
        Err(e) => {
            warn!(%request_id, error = %e, "Failed to serialize response");
            return;
        }
    };

    if sink.post(Envelope::new(message, transferables)).is_err() {
        debug!(%request_id, "Response undeliverable, caller is gone");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::{Value, json};
    use tokio::sync::Notify;

    use crate::protocol::ErrorCode;
    use crate::rpc::HandlerTable;
    use crate::transport;

    fn empty_table() -> Arc<dyn MethodTable> {
        Arc::new(HandlerTable::new())
    }

    /// Reads the next request from a raw transport end.
    async fn next_request(remote: &mut Transport) -> Request {
        let envelope = remote.recv().await.expect("request");
        match Message::from_value(envelope.payload).expect("valid message") {
            Message::Request(request) => request,
            Message::Response(response) => panic!("expected request, got {response:?}"),
        }
    }

    /// Reads the next response from a raw transport end.
    async fn next_response(remote: &mut Transport) -> (Response, Vec<Transferable>) {
        let envelope = remote.recv().await.expect("response");
        match Message::from_value(envelope.payload).expect("valid message") {
            Message::Response(response) => (response, envelope.transferables),
            Message::Request(request) => panic!("expected response, got {request:?}"),
        }
    }

    fn reply(remote: &Transport, id: RequestId, result: Value) {
        let message = Message::Response(Response::success(id, result))
            .into_value()
            .expect("serialize");
        remote.send(message, Vec::new()).expect("send");
    }

    #[tokio::test]
    async fn test_out_of_order_responses_match_by_id() {
        let (local, mut remote) = transport::pair();
        let bridge = Bridge::new(local, empty_table());

        let a = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.execute("call", Payload::value(json!("A"))).await }
        });
        let a_req = next_request(&mut remote).await;
        let b = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.execute("call", Payload::value(json!("B"))).await }
        });
        let b_req = next_request(&mut remote).await;
        let c = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.execute("call", Payload::value(json!("C"))).await }
        });
        let c_req = next_request(&mut remote).await;

        assert_eq!(bridge.pending_count(), 3);

        reply(&remote, c_req.id, json!("result C"));
        reply(&remote, a_req.id, json!("result A"));
        reply(&remote, b_req.id, json!("result B"));

        assert_eq!(a.await.expect("join").expect("A").value, json!("result A"));
        assert_eq!(b.await.expect("join").expect("B").value, json!("result B"));
        assert_eq!(c.await.expect("join").expect("C").value, json!("result C"));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_teardown_rejects_pending_calls() {
        let (local, mut remote) = transport::pair();
        let bridge = Bridge::new(local, empty_table());

        let first = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.execute("one", Payload::null()).await }
        });
        let second = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.execute("two", Payload::null()).await }
        });
        next_request(&mut remote).await;
        next_request(&mut remote).await;

        drop(remote);

        let first = first.await.expect("join").unwrap_err();
        let second = second.await.expect("join").unwrap_err();
        assert!(matches!(first, Error::ConnectionClosed));
        assert!(matches!(second, Error::ConnectionClosed));
        assert_eq!(bridge.closed().await, CloseReason::ChannelClosed);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_after_close_is_rejected() {
        let (local, _remote) = transport::pair();
        let bridge = Bridge::new(local, empty_table());

        bridge.close(CloseReason::ContextTerminated);
        let err = bridge.execute("anything", Payload::null()).await.unwrap_err();
        assert!(matches!(err, Error::ContextTerminated));
        assert!(bridge.is_closed());
    }

    #[tokio::test]
    async fn test_close_rejects_pending_with_context_terminated() {
        let (local, mut remote) = transport::pair();
        let bridge = Bridge::new(local, empty_table());

        let call = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.execute("slow", Payload::null()).await }
        });
        next_request(&mut remote).await;

        bridge.close(CloseReason::ContextTerminated);
        let err = call.await.expect("join").unwrap_err();
        assert!(matches!(err, Error::ContextTerminated));

        // Sink closes after the drain.
        assert!(remote.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_finished_resolves_after_sink_closes() {
        let (local, mut remote) = transport::pair();
        let bridge = Bridge::new(local, empty_table());

        bridge.close(CloseReason::ContextTerminated);
        tokio::time::timeout(Duration::from_secs(1), bridge.finished())
            .await
            .expect("finished");
        assert!(remote.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_is_answered_not_thrown() {
        let (local, mut remote) = transport::pair();
        let _bridge = Bridge::new(local, empty_table());

        let request = Message::Request(Request::new(RequestId::from_u64(9), "nope", Value::Null));
        remote
            .send(request.into_value().expect("serialize"), Vec::new())
            .expect("send");

        let (response, _) = next_response(&mut remote).await;
        assert_eq!(response.id, RequestId::from_u64(9));
        assert_eq!(response.error, Some(ErrorCode::UnknownMethod));
        assert!(response.message.unwrap_or_default().contains("nope"));

        // Channel stays alive.
        let request = Message::Request(Request::new(RequestId::from_u64(10), "nope", Value::Null));
        remote
            .send(request.into_value().expect("serialize"), Vec::new())
            .expect("send");
        let (response, _) = next_response(&mut remote).await;
        assert_eq!(response.id, RequestId::from_u64(10));
    }

    #[tokio::test]
    async fn test_malformed_request_with_id_gets_fault() {
        let (local, mut remote) = transport::pair();
        let table = HandlerTable::new().method("ping", |_| async { Ok(Payload::from(true)) });
        let _bridge = Bridge::new(local, Arc::new(table));

        remote
            .send(json!({"kind": "request", "id": 4, "method": 12}), Vec::new())
            .expect("send");
        let (response, _) = next_response(&mut remote).await;
        assert_eq!(response.id, RequestId::from_u64(4));
        assert_eq!(response.error, Some(ErrorCode::MalformedMessage));
    }

    #[tokio::test]
    async fn test_malformed_response_fails_pending_call() {
        let (local, mut remote) = transport::pair();
        let bridge = Bridge::new(local, empty_table());

        let call = tokio::spawn({
            let bridge = bridge.clone();
            async move {
                bridge
                    .execute_with_timeout("call", Payload::null(), Duration::from_secs(5))
                    .await
            }
        });
        let request = next_request(&mut remote).await;

        remote
            .send(
                json!({"kind": "response", "id": request.id.as_u64(), "error": "bogus_code"}),
                Vec::new(),
            )
            .expect("send");

        let err = call.await.expect("join").unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }), "got {err:?}");
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_garbage_is_dropped_and_loop_survives() {
        let (local, mut remote) = transport::pair();
        let table = HandlerTable::new().method("ping", |_| async { Ok(Payload::from(true)) });
        let _bridge = Bridge::new(local, Arc::new(table));

        remote.send(json!("garbage"), Vec::new()).expect("send");
        remote.send(json!({"kind": "teleport"}), Vec::new()).expect("send");

        let request = Message::Request(Request::new(RequestId::from_u64(1), "ping", Value::Null));
        remote
            .send(request.into_value().expect("serialize"), Vec::new())
            .expect("send");
        let (response, _) = next_response(&mut remote).await;
        assert_eq!(response.result, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_fault() {
        let (local, mut remote) = transport::pair();
        let table = HandlerTable::new().method("explode", |_| async {
            panic!("boom");
        });
        let _bridge = Bridge::new(local, Arc::new(table));

        let request =
            Message::Request(Request::new(RequestId::from_u64(1), "explode", Value::Null));
        remote
            .send(request.into_value().expect("serialize"), Vec::new())
            .expect("send");

        let (response, _) = next_response(&mut remote).await;
        assert_eq!(response.error, Some(ErrorCode::HandlerFailed));
        assert!(response.message.unwrap_or_default().contains("explode"));
    }

    #[tokio::test]
    async fn test_bidirectional_calls_with_transferables() {
        let (host_end, extension_end) = transport::pair();

        let host_table = HandlerTable::new().method("getBytes", |_| async {
            Ok(Payload::transfer(
                json!({"body": 0}),
                vec![Transferable::new(vec![1, 2, 3])],
            ))
        });
        let extension_table = HandlerTable::new().method("echo", |param: Payload| async move {
            Ok(param)
        });

        let host = Bridge::new(host_end, Arc::new(host_table));
        let extension = Bridge::new(extension_end, Arc::new(extension_table));

        let (from_host, from_extension) = tokio::join!(
            host.execute("echo", Payload::value(json!({"hello": "extension"}))),
            extension.execute("getBytes", Payload::null()),
        );

        assert_eq!(from_host.expect("echo").value, json!({"hello": "extension"}));
        let bytes = from_extension.expect("getBytes");
        assert_eq!(bytes.transferables[0].as_bytes(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_remote_fault_surfaces_as_remote_error() {
        let (host_end, extension_end) = transport::pair();
        let host_table = HandlerTable::new().method("guarded", |_| async {
            Err(RpcFault::permission_denied("gameSaves:write"))
        });
        let _host = Bridge::new(host_end, Arc::new(host_table));
        let extension = Bridge::new(extension_end, empty_table());

        let err = extension
            .execute("guarded", Payload::null())
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_execute_with_timeout_removes_pending_entry() {
        let (local, _remote) = transport::pair();
        let bridge = Bridge::new(local, empty_table());

        let err = bridge
            .execute_with_timeout("silent", Payload::null(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { .. }));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_graceful_close_flushes_in_flight_response() {
        let (local, mut remote) = transport::pair();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));

        let table = HandlerTable::new().method("exit", {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            let finished = Arc::clone(&finished);
            move |_| {
                let started = Arc::clone(&started);
                let release = Arc::clone(&release);
                let finished = Arc::clone(&finished);
                async move {
                    started.notify_one();
                    release.notified().await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(Payload::from(true))
                }
            }
        });
        let bridge = Bridge::new(local, Arc::new(table));

        let request = Message::Request(Request::new(RequestId::from_u64(3), "exit", Value::Null));
        remote
            .send(request.into_value().expect("serialize"), Vec::new())
            .expect("send");
        started.notified().await;

        bridge.close(CloseReason::ContextTerminated);
        release.notify_one();

        let (response, _) = next_response(&mut remote).await;
        assert_eq!(response.id, RequestId::from_u64(3));
        assert_eq!(response.result, Some(json!(true)));
        assert!(finished.load(Ordering::SeqCst));
        assert!(remote.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_failure_rejects_call() {
        let (local, remote) = transport::pair();
        let bridge = Bridge::new(local, empty_table());
        drop(remote);

        let err = bridge.execute("any", Payload::null()).await.unwrap_err();
        assert!(err.is_connection_error());
    }
}

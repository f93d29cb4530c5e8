//! # Transport Abstraction Layer
//!
//! This module hides the underlying medium (datagram socket, serial link,
//! wireless L2) from the protocol state machine behind a uniform,
//! packet-oriented handle. The protocol worker only ever calls `send` and
//! `recv` on a [`TransportHandle`]; everything below that line is supplied
//! by a lower transport implementation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐    ┌───────────────────┐    ┌──────────────────┐
//! │  Protocol worker │───▶│  TransportHandle  │───▶│  Lower transport │
//! │  (state machine) │    │  (queues, dispatch)│   │  (UDP, serial…)  │
//! └──────────────────┘    └───────────────────┘    └──────────────────┘
//! ```
//!
//! The receive queue is the single integration point: lower layers that do
//! their own buffering still deliver framed bytes through
//! [`TransportHandle::put_recv`] so the protocol sees one uniform stream.
//! On the send side the handle either delegates to an installed direct
//! sender or falls back to its own bounded send queue for lower layers that
//! cannot buffer outbound data themselves.
//!
//! ## Capability surface
//!
//! A lower transport plugs into the handle through a small, fixed set of
//! capabilities: a direct sender, a context slot for its per-handle state,
//! the receive path, a maximum single-frame payload, and asynchronous event
//! delivery. The handle never inspects the context value; it only stores it
//! on the lower layer's behalf.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::AuthError;
use crate::session::InstanceId;

pub mod udp;

pub use udp::UdpParams;

/// Capacity in bytes of each of the handle's receive and send queues.
///
/// Sized for several complete handshake frames; the largest frame on the
/// wire is 67 bytes.
pub const QUEUE_CAPACITY: usize = 4096;

/// The kind of lower transport bound to a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// IPv4/UDP datagram transport, the reference implementation.
    Udp,

    /// Bluetooth L2 link. Not implemented.
    Bluetooth,

    /// Serial UART link. Not implemented.
    Serial,
}

/// Transport-specific parameters handed through to the lower layer.
#[derive(Debug, Clone)]
pub enum TransportParams {
    /// Parameters for the UDP reference transport.
    Udp(UdpParams),
}

/// Asynchronous notifications delivered to the lower transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link came up.
    Connect,

    /// The link went down.
    Disconnect,

    /// The link went down and came back.
    Reconnect,

    /// An event only the bound lower transport understands.
    TransportSpecific(u32),
}

/// Direct send path installed by a lower transport.
///
/// When a lower layer can queue outbound data itself it installs one of
/// these and [`TransportHandle::send`] delegates to it; otherwise the
/// handle buffers outbound bytes in its own send queue for the lower layer
/// to drain.
#[async_trait]
pub trait DirectSender: Send + Sync {
    /// Transmit one frame, returning the number of bytes accepted.
    async fn send(&self, data: &[u8]) -> Result<usize, AuthError>;
}

/// Lifecycle surface a lower transport exposes to the handle.
#[async_trait]
pub trait LowerTransport: Send + Sync {
    /// Stop workers, close descriptors, and release the instance slot.
    ///
    /// Teardown must be bounded: implementations unblock any receive worker
    /// explicitly rather than waiting for a read to return on its own.
    async fn shutdown(&mut self) -> Result<(), AuthError>;

    /// Deliver an asynchronous event to the lower layer.
    async fn event(&mut self, event: TransportEvent) -> Result<(), AuthError>;
}

/// Bounded byte queue connecting a producer worker to a single consumer.
///
/// Producers push byte runs with [`ByteQueue::put`]; the consumer pops with
/// a millisecond timeout, where an empty queue after the window yields
/// [`AuthError::Timeout`]. Blocking on the pop side is the back-pressure
/// signal for the protocol worker, and the timeout doubles as its
/// cancellation polling cadence.
pub struct ByteQueue {
    buf: Mutex<VecDeque<u8>>,
    notify: Notify,
    capacity: usize,
}

impl ByteQueue {
    /// Create a queue bounded at `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Append bytes, truncating at capacity. Returns the count accepted.
    pub fn put(&self, data: &[u8]) -> usize {
        let accepted = {
            let mut buf = self.buf.lock().expect("byte queue lock poisoned");
            let room = self.capacity.saturating_sub(buf.len());
            let n = room.min(data.len());
            buf.extend(data[..n].iter().copied());
            n
        };
        if accepted > 0 {
            self.notify.notify_waiters();
        }
        accepted
    }

    /// Pop up to `out.len()` bytes, waiting up to `timeout_ms` for data.
    ///
    /// A zero timeout is a non-blocking poll. Returns the number of bytes
    /// delivered, which may be fewer than requested, or
    /// [`AuthError::Timeout`] when the window elapses with nothing queued.
    pub async fn pop(&self, out: &mut [u8], timeout_ms: u64) -> Result<usize, AuthError> {
        if out.is_empty() {
            return Err(AuthError::InvalidParam("receive buffer is empty"));
        }
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            // Register for a wakeup before checking the queue so a put
            // between the check and the await is not missed.
            let notified = self.notify.notified();
            {
                let mut buf = self.buf.lock().expect("byte queue lock poisoned");
                if !buf.is_empty() {
                    let n = out.len().min(buf.len());
                    for (dst, src) in out.iter_mut().zip(buf.drain(..n)) {
                        *dst = src;
                    }
                    return Ok(n);
                }
            }
            if timeout_ms == 0 {
                return Err(AuthError::Timeout);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(AuthError::Timeout);
            }
        }
    }

    /// Copy up to `out.len()` queued bytes without removing them.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let buf = self.buf.lock().expect("byte queue lock poisoned");
        let n = out.len().min(buf.len());
        for (dst, src) in out.iter_mut().zip(buf.iter()) {
            *dst = *src;
        }
        n
    }

    /// Number of bytes currently queued.
    pub fn len(&self) -> usize {
        self.buf.lock().expect("byte queue lock poisoned").len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `timeout_ms` for the queue to become non-empty and
    /// return the queued byte count.
    pub async fn len_wait(&self, timeout_ms: u64) -> Result<usize, AuthError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let notified = self.notify.notified();
            let len = self.len();
            if len > 0 {
                return Ok(len);
            }
            if timeout_ms == 0 {
                return Err(AuthError::Timeout);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(AuthError::Timeout);
            }
        }
    }

    /// Drop all queued bytes.
    pub fn clear(&self) {
        self.buf.lock().expect("byte queue lock poisoned").clear();
    }
}

/// Opaque per-link transport object shared by the protocol worker and the
/// lower transport's receive worker.
///
/// Created bare with [`TransportHandle::new`] (custom lower transports) or
/// bound to a built-in lower transport with [`TransportHandle::init`]. The
/// handle owns the receive and send queues, the optional direct sender, the
/// lower layer's context slot, and the advertised maximum payload.
pub struct TransportHandle {
    instance: InstanceId,
    max_payload: AtomicUsize,
    recv_queue: ByteQueue,
    send_queue: ByteQueue,
    sender: Mutex<Option<Arc<dyn DirectSender>>>,
    context: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    lower: tokio::sync::Mutex<Option<Box<dyn LowerTransport>>>,
}

impl TransportHandle {
    /// Create a handle with no lower transport bound.
    ///
    /// External transport implementations attach themselves through
    /// [`set_sender`](Self::set_sender), [`set_context`](Self::set_context),
    /// [`set_max_payload`](Self::set_max_payload), and
    /// [`put_recv`](Self::put_recv).
    pub fn new(instance: InstanceId) -> Arc<Self> {
        Arc::new(Self {
            instance,
            max_payload: AtomicUsize::new(usize::MAX),
            recv_queue: ByteQueue::new(QUEUE_CAPACITY),
            send_queue: ByteQueue::new(QUEUE_CAPACITY),
            sender: Mutex::new(None),
            context: Mutex::new(None),
            lower: tokio::sync::Mutex::new(None),
        })
    }

    /// Allocate a handle and bind it to a built-in lower transport.
    ///
    /// Dispatches on `xport_type` and hands `params` to the selected lower
    /// layer. Fails with [`AuthError::InvalidParam`] for transport types
    /// that have no implementation and with the lower layer's error when it
    /// cannot start.
    pub async fn init(
        instance: InstanceId,
        xport_type: TransportType,
        params: TransportParams,
    ) -> Result<Arc<Self>, AuthError> {
        let hdl = Self::new(instance);
        match (xport_type, params) {
            (TransportType::Udp, TransportParams::Udp(udp_params)) => {
                let lower = udp::UdpTransport::start(&hdl, udp_params).await?;
                *hdl.lower.lock().await = Some(Box::new(lower));
            }
            (TransportType::Bluetooth | TransportType::Serial, _) => {
                return Err(AuthError::InvalidParam("transport type not implemented"));
            }
        }
        Ok(hdl)
    }

    /// Tear down the lower transport and drain both queues.
    pub async fn deinit(&self) -> Result<(), AuthError> {
        if let Some(mut lower) = self.lower.lock().await.take() {
            lower.shutdown().await?;
        }
        *self.sender.lock().expect("sender lock poisoned") = None;
        *self.context.lock().expect("context lock poisoned") = None;
        self.recv_queue.clear();
        self.send_queue.clear();
        debug!("transport handle for instance {} deinitialized", self.instance);
        Ok(())
    }

    /// The authentication instance this handle belongs to.
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Store or clear the lower layer's per-handle state.
    ///
    /// The handle never dereferences the value; it is the lower layer's to
    /// set and read back.
    pub fn set_context(&self, context: Option<Arc<dyn Any + Send + Sync>>) {
        *self.context.lock().expect("context lock poisoned") = context;
    }

    /// Read back the lower layer's per-handle state.
    pub fn context(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.context.lock().expect("context lock poisoned").clone()
    }

    /// Install or remove the direct send path.
    pub fn set_sender(&self, sender: Option<Arc<dyn DirectSender>>) {
        *self.sender.lock().expect("sender lock poisoned") = sender;
    }

    /// Record the maximum single-frame payload the lower layer will carry.
    pub fn set_max_payload(&self, max: usize) {
        self.max_payload.store(max, Ordering::Release);
    }

    /// Maximum bytes the lower layer carries in one frame.
    pub fn max_payload(&self) -> usize {
        self.max_payload.load(Ordering::Acquire)
    }

    /// Send a frame to the peer.
    ///
    /// Delegates to the installed direct sender when one is present,
    /// otherwise enqueues the bytes for the lower layer to drain. Only the
    /// queued path may accept fewer bytes than offered.
    pub async fn send(&self, data: &[u8]) -> Result<usize, AuthError> {
        if data.len() > self.max_payload() {
            return Err(AuthError::InvalidParam("frame exceeds transport payload limit"));
        }
        let sender = self.sender.lock().expect("sender lock poisoned").clone();
        match sender {
            Some(sender) => sender.send(data).await,
            None => Ok(self.send_queue.put(data)),
        }
    }

    /// Pop up to `buf.len()` inbound bytes, waiting up to `timeout_ms`.
    ///
    /// A zero timeout polls without blocking. Yields [`AuthError::Timeout`]
    /// when the window elapses with no bytes; any other error is fatal for
    /// the caller's protocol exchange.
    pub async fn recv(&self, buf: &mut [u8], timeout_ms: u64) -> Result<usize, AuthError> {
        self.recv_queue.pop(buf, timeout_ms).await
    }

    /// Copy inbound bytes without consuming them.
    pub fn recv_peek(&self, buf: &mut [u8]) -> usize {
        self.recv_queue.peek(buf)
    }

    /// Lower-layer entry point: push received bytes into the receive queue.
    ///
    /// Returns the number of bytes the bounded queue accepted.
    pub fn put_recv(&self, data: &[u8]) -> usize {
        self.recv_queue.put(data)
    }

    /// Pop queued outbound bytes, for lower layers without a direct sender.
    pub async fn next_send(&self, buf: &mut [u8], timeout_ms: u64) -> Result<usize, AuthError> {
        self.send_queue.pop(buf, timeout_ms).await
    }

    /// Bytes waiting in the send queue.
    pub fn send_queued_bytes(&self) -> usize {
        self.send_queue.len()
    }

    /// Bytes waiting in the receive queue.
    pub fn recv_queued_bytes(&self) -> usize {
        self.recv_queue.len()
    }

    /// Wait up to `timeout_ms` for receive-queue bytes and return the count.
    pub async fn recv_queued_bytes_wait(&self, timeout_ms: u64) -> Result<usize, AuthError> {
        self.recv_queue.len_wait(timeout_ms).await
    }

    /// Forward an asynchronous event to the lower transport.
    pub async fn event(&self, event: TransportEvent) -> Result<(), AuthError> {
        match self.lower.lock().await.as_mut() {
            Some(lower) => lower.event(event).await,
            None => Err(AuthError::InvalidParam("no lower transport bound")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Queued bytes come back in order and partial pops are allowed.
    #[tokio::test]
    async fn test_queue_put_pop_order() {
        let q = ByteQueue::new(64);
        assert_eq!(q.put(&[1, 2, 3, 4, 5]), 5);

        let mut buf = [0u8; 3];
        assert_eq!(q.pop(&mut buf, 100).await.unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);

        let mut rest = [0u8; 8];
        assert_eq!(q.pop(&mut rest, 100).await.unwrap(), 2);
        assert_eq!(&rest[..2], &[4, 5]);
    }

    /// An empty queue times out, and a zero timeout polls without waiting.
    #[tokio::test]
    async fn test_queue_timeout_and_nonblocking() {
        let q = ByteQueue::new(64);
        let mut buf = [0u8; 4];

        let started = std::time::Instant::now();
        assert!(matches!(q.pop(&mut buf, 50).await, Err(AuthError::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(45));

        assert!(matches!(q.pop(&mut buf, 0).await, Err(AuthError::Timeout)));
    }

    /// A pop blocked on an empty queue wakes when bytes arrive.
    #[tokio::test]
    async fn test_queue_wakes_on_put() {
        let q = Arc::new(ByteQueue::new(64));
        let popper = {
            let q = Arc::clone(&q);
            tokio::spawn(async move {
                let mut buf = [0u8; 2];
                q.pop(&mut buf, 1_000).await.map(|n| (n, buf))
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.put(&[9, 8]);

        let (n, buf) = popper.await.unwrap().unwrap();
        assert_eq!((n, buf), (2, [9, 8]));
    }

    /// Peeking copies bytes but leaves the queue intact.
    #[tokio::test]
    async fn test_queue_peek_does_not_consume() {
        let q = ByteQueue::new(64);
        q.put(&[7, 7, 7]);

        let mut peeked = [0u8; 8];
        assert_eq!(q.peek(&mut peeked), 3);
        assert_eq!(q.len(), 3);

        let mut buf = [0u8; 8];
        assert_eq!(q.pop(&mut buf, 0).await.unwrap(), 3);
    }

    /// Puts past capacity report how many bytes actually fit.
    #[test]
    fn test_queue_bounded() {
        let q = ByteQueue::new(4);
        assert_eq!(q.put(&[1, 2, 3]), 3);
        assert_eq!(q.put(&[4, 5, 6]), 1);
        assert_eq!(q.len(), 4);
    }

    /// With no direct sender installed, sends land in the send queue.
    #[tokio::test]
    async fn test_handle_send_queued_without_sender() {
        let hdl = TransportHandle::new(InstanceId::Instance1);
        assert_eq!(hdl.send(&[1, 2, 3]).await.unwrap(), 3);
        assert_eq!(hdl.send_queued_bytes(), 3);

        let mut buf = [0u8; 8];
        assert_eq!(hdl.next_send(&mut buf, 0).await.unwrap(), 3);
        assert_eq!(hdl.send_queued_bytes(), 0);
    }

    /// Frames over the advertised payload limit are rejected up front.
    #[tokio::test]
    async fn test_handle_send_respects_max_payload() {
        let hdl = TransportHandle::new(InstanceId::Instance1);
        hdl.set_max_payload(4);
        assert!(matches!(
            hdl.send(&[0u8; 5]).await,
            Err(AuthError::InvalidParam(_))
        ));
        assert_eq!(hdl.send(&[0u8; 4]).await.unwrap(), 4);
    }

    /// The context slot round-trips the lower layer's state untouched.
    #[test]
    fn test_handle_context_slot() {
        let hdl = TransportHandle::new(InstanceId::Instance2);
        assert!(hdl.context().is_none());

        hdl.set_context(Some(Arc::new(41u32)));
        let ctx = hdl.context().unwrap();
        assert_eq!(ctx.downcast_ref::<u32>(), Some(&41));

        hdl.set_context(None);
        assert!(hdl.context().is_none());
    }

    /// Waiting introspection returns once bytes show up.
    #[tokio::test]
    async fn test_recv_queued_bytes_wait() {
        let hdl = TransportHandle::new(InstanceId::Instance1);
        assert!(matches!(
            hdl.recv_queued_bytes_wait(30).await,
            Err(AuthError::Timeout)
        ));

        hdl.put_recv(&[1, 2]);
        assert_eq!(hdl.recv_queued_bytes_wait(30).await.unwrap(), 2);
        assert_eq!(hdl.recv_queued_bytes(), 2);
    }
}

//! # UDP Reference Transport
//!
//! Binds the transport contract to an IPv4/UDP datagram socket pair,
//! primarily for development and loopback testing. Each handle gets a
//! sending socket aimed at the peer's receive port and a receive worker
//! that reads datagrams, validates framing, and forwards complete frames
//! into the handle's receive queue.
//!
//! Instances come from a fixed pool sized by
//! [`NUM_AUTH_INSTANCES`](crate::session::NUM_AUTH_INSTANCES); slots are
//! claimed with an atomic flag and released on shutdown.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::AuthError;
use crate::message;
use crate::session::NUM_AUTH_INSTANCES;
use crate::transport::{DirectSender, LowerTransport, TransportEvent, TransportHandle};

/// Maximum application payload carried in one UDP frame.
pub const UDP_LINK_MTU: usize = 1024;

/// Parameters for the UDP lower transport.
#[derive(Debug, Clone)]
pub struct UdpParams {
    /// Local address to receive datagrams on.
    pub recv_addr: Ipv4Addr,

    /// Local port to receive datagrams on.
    pub recv_port: u16,

    /// Peer address to send datagrams to.
    pub send_addr: Ipv4Addr,

    /// Peer port to send datagrams to.
    pub send_port: u16,
}

/// Per-handle state the UDP layer parks in the handle's context slot.
#[derive(Debug)]
pub struct UdpInstanceInfo {
    /// Pool slot index backing this instance.
    pub slot: usize,

    /// Port this instance receives on.
    pub recv_port: u16,

    /// Peer port this instance sends to.
    pub send_port: u16,
}

/// Fixed pool of transport instance slots, one flag per slot.
static UDP_SLOTS: [AtomicBool; NUM_AUTH_INSTANCES] =
    [AtomicBool::new(false), AtomicBool::new(false)];

fn acquire_slot() -> Option<usize> {
    UDP_SLOTS.iter().position(|slot| {
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    })
}

fn release_slot(slot: usize) {
    UDP_SLOTS[slot].store(false, Ordering::Release);
}

/// Direct sender writing frames straight out the sending socket.
struct UdpSender {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

#[async_trait]
impl DirectSender for UdpSender {
    async fn send(&self, data: &[u8]) -> Result<usize, AuthError> {
        if data.len() > UDP_LINK_MTU {
            return Err(AuthError::InvalidParam("frame exceeds UDP link MTU"));
        }
        let sent = self.socket.send_to(data, self.peer).await?;
        debug!("sent {} bytes to {}", sent, self.peer);
        Ok(sent)
    }
}

/// UDP lower transport bound to a handle.
pub(crate) struct UdpTransport {
    slot: usize,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl UdpTransport {
    /// Claim a pool slot, bind both sockets, and start the receive worker.
    ///
    /// Both sockets are bound here rather than inside the worker so that
    /// address conflicts surface to the caller before anything is spawned.
    pub(crate) async fn start(
        hdl: &Arc<TransportHandle>,
        params: UdpParams,
    ) -> Result<Self, AuthError> {
        let slot = acquire_slot()
            .ok_or(AuthError::NoResource("no free UDP transport instances"))?;

        let recv_sock =
            match UdpSocket::bind(SocketAddrV4::new(params.recv_addr, params.recv_port)).await {
                Ok(sock) => sock,
                Err(e) => {
                    release_slot(slot);
                    error!("failed to bind receive socket on port {}: {}", params.recv_port, e);
                    return Err(e.into());
                }
            };
        let send_sock = match UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(sock) => Arc::new(sock),
            Err(e) => {
                release_slot(slot);
                error!("failed to bind send socket: {}", e);
                return Err(e.into());
            }
        };
        let peer = SocketAddr::V4(SocketAddrV4::new(params.send_addr, params.send_port));

        hdl.set_max_payload(UDP_LINK_MTU);
        hdl.set_context(Some(Arc::new(UdpInstanceInfo {
            slot,
            recv_port: params.recv_port,
            send_port: params.send_port,
        })));
        hdl.set_sender(Some(Arc::new(UdpSender {
            socket: send_sock,
            peer,
        })));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(recv_worker(Arc::downgrade(hdl), recv_sock, shutdown_rx));

        debug!(
            "UDP transport up in slot {}: recv port {}, peer {}",
            slot, params.recv_port, peer
        );
        Ok(Self {
            slot,
            shutdown: shutdown_tx,
            worker: Some(worker),
        })
    }
}

#[async_trait]
impl LowerTransport for UdpTransport {
    async fn shutdown(&mut self) -> Result<(), AuthError> {
        let _ = self.shutdown.send(true);
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!("UDP receive worker did not exit cleanly: {}", e);
            }
        }
        release_slot(self.slot);
        debug!("UDP transport slot {} released", self.slot);
        Ok(())
    }

    async fn event(&mut self, event: TransportEvent) -> Result<(), AuthError> {
        // Datagram sockets carry no link state worth reacting to.
        debug!("UDP transport ignoring event {:?}", event);
        Ok(())
    }
}

/// Receive worker: reads datagrams until shutdown is signaled.
///
/// The worker holds only a weak reference to the handle; if the handle is
/// gone the worker exits on the next datagram. The shutdown signal races
/// the socket read inside `select`, so teardown never waits on a peer to
/// send one more packet.
async fn recv_worker(
    hdl: Weak<TransportHandle>,
    socket: UdpSocket,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rx_buf = vec![0u8; UDP_LINK_MTU];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut rx_buf) => {
                let (len, from) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("UDP receive failed: {}", e);
                        continue;
                    }
                };
                debug!("received {} bytes from {}", len, from);

                let Some(hdl) = hdl.upgrade() else { break };

                // A datagram either carries one complete frame or is noise.
                match message::frame_span(&rx_buf[..len]) {
                    Some((begin, count)) => {
                        message::assemble(&hdl, &rx_buf[begin..begin + count]);
                    }
                    None => error!("dropping {} bytes without a complete frame", len),
                }
            }
        }
    }

    debug!("UDP receive worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InstanceId;
    use crate::transport::{TransportParams, TransportType};

    /// Serializes the tests below: they all draw from the process-wide
    /// instance pool and would starve each other if interleaved.
    static POOL_TEST_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    fn loopback_params(recv_port: u16, send_port: u16) -> UdpParams {
        UdpParams {
            recv_addr: Ipv4Addr::LOCALHOST,
            recv_port,
            send_addr: Ipv4Addr::LOCALHOST,
            send_port,
        }
    }

    /// The instance pool hands out every slot once and refuses a third
    /// claim until a slot is released.
    #[tokio::test]
    async fn test_instance_pool_exhaustion() {
        let _guard = POOL_TEST_LOCK.lock().await;
        let first = TransportHandle::init(
            InstanceId::Instance1,
            TransportType::Udp,
            TransportParams::Udp(loopback_params(42511, 42512)),
        )
        .await
        .unwrap();
        let second = TransportHandle::init(
            InstanceId::Instance2,
            TransportType::Udp,
            TransportParams::Udp(loopback_params(42513, 42514)),
        )
        .await
        .unwrap();

        let third = TransportHandle::init(
            InstanceId::Instance1,
            TransportType::Udp,
            TransportParams::Udp(loopback_params(42515, 42516)),
        )
        .await;
        assert!(matches!(third, Err(AuthError::NoResource(_))));

        first.deinit().await.unwrap();
        let again = TransportHandle::init(
            InstanceId::Instance1,
            TransportType::Udp,
            TransportParams::Udp(loopback_params(42517, 42518)),
        )
        .await
        .unwrap();

        again.deinit().await.unwrap();
        second.deinit().await.unwrap();
    }

    /// A bind failure releases the claimed slot.
    #[tokio::test]
    async fn test_bind_failure_releases_slot() {
        let _guard = POOL_TEST_LOCK.lock().await;
        let holder = TransportHandle::init(
            InstanceId::Instance1,
            TransportType::Udp,
            TransportParams::Udp(loopback_params(42521, 42522)),
        )
        .await
        .unwrap();

        // Second bind on the same receive port must fail and give its
        // slot back.
        let clash = TransportHandle::init(
            InstanceId::Instance2,
            TransportType::Udp,
            TransportParams::Udp(loopback_params(42521, 42524)),
        )
        .await;
        assert!(matches!(clash, Err(AuthError::Transport(_))));

        let retry = TransportHandle::init(
            InstanceId::Instance2,
            TransportType::Udp,
            TransportParams::Udp(loopback_params(42525, 42526)),
        )
        .await
        .unwrap();

        retry.deinit().await.unwrap();
        holder.deinit().await.unwrap();
    }

    /// The context slot exposes the UDP instance state.
    #[tokio::test]
    async fn test_context_carries_instance_info() {
        let _guard = POOL_TEST_LOCK.lock().await;
        let hdl = TransportHandle::init(
            InstanceId::Instance1,
            TransportType::Udp,
            TransportParams::Udp(loopback_params(42531, 42532)),
        )
        .await
        .unwrap();

        let ctx = hdl.context().unwrap();
        let info = ctx.downcast_ref::<UdpInstanceInfo>().unwrap();
        assert_eq!(info.recv_port, 42531);
        assert_eq!(info.send_port, 42532);

        hdl.deinit().await.unwrap();
    }
}

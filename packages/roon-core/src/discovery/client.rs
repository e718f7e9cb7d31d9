//! Multicast SOOD query client.
//!
//! One socket per client, bound to the configured interface on an ephemeral
//! port. Cores answer unicast to that port, so the same socket sends the
//! query and collects replies.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use super::sood::{build_query, parse_reply};
use super::types::{DiscoveryError, DiscoveryResult};
use crate::config::DiscoveryConfig;
use crate::protocol_constants::SOOD_MULTICAST_TTL;

/// Largest datagram we accept.
const RECV_BUFFER_SIZE: usize = 65_535;

/// Consecutive receive errors after which a query gives up.
const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 5;

/// Silent interval of a running query.
///
/// Only datagrams restart the interval. Receive errors count against it and
/// against [`MAX_CONSECUTIVE_RECV_ERRORS`].
#[derive(Debug)]
struct ReceiveWindow {
    wait: Duration,
    since: Instant,
    errors: u32,
}

impl ReceiveWindow {
    fn new(wait: Duration) -> Self {
        Self {
            wait,
            since: Instant::now(),
            errors: 0,
        }
    }

    fn remaining(&self) -> Duration {
        self.wait.saturating_sub(self.since.elapsed())
    }

    fn on_datagram(&mut self) {
        self.since = Instant::now();
        self.errors = 0;
    }

    /// Records a receive error. Returns false once the query should stop.
    fn on_error(&mut self) -> bool {
        self.errors += 1;
        self.errors < MAX_CONSECUTIVE_RECV_ERRORS && !self.remaining().is_zero()
    }
}

/// Creates the query socket.
///
/// - SO_REUSEADDR for rapid restarts
/// - Multicast TTL so the query crosses a few routed hops
/// - Non-blocking for tokio
fn create_socket(bind_addr: SocketAddr) -> Result<UdpSocket, DiscoveryError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[Discovery] Failed to set SO_REUSEADDR on {}: {}", bind_addr, e);
    }

    if let Err(e) = socket.set_multicast_ttl_v4(SOOD_MULTICAST_TTL) {
        log::warn!("[Discovery] Failed to set multicast TTL on {}: {}", bind_addr, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// Outcome of feeding one datagram to a [`ReplyCollector`].
#[derive(Debug, PartialEq, Eq)]
pub enum Accepted {
    /// Not a SOOD reply.
    Ignored,
    /// A reply from an address that already answered.
    Duplicate,
    /// A new core; index into the collected results.
    New(usize),
}

/// Accumulates replies for one query, one result per responder address.
#[derive(Debug, Default)]
pub struct ReplyCollector {
    results: Vec<DiscoveryResult>,
}

impl ReplyCollector {
    pub fn accept(&mut self, source: IpAddr, datagram: &[u8]) -> Accepted {
        let Some(fields) = parse_reply(datagram) else {
            return Accepted::Ignored;
        };
        if self.results.iter().any(|r| r.core_address == source) {
            return Accepted::Duplicate;
        }
        self.results.push(DiscoveryResult::from_fields(source, &fields));
        Accepted::New(self.results.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&DiscoveryResult> {
        self.results.get(index)
    }

    pub fn into_results(self) -> Vec<DiscoveryResult> {
        self.results
    }
}

/// SOOD query client.
///
/// Queries run one at a time; `query` takes `&mut self`.
pub struct DiscoveryClient {
    socket: UdpSocket,
    target: SocketAddr,
}

impl DiscoveryClient {
    /// Binds the query socket on the configured interface.
    pub fn bind(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let bind_addr = SocketAddr::new(IpAddr::V4(config.bind_address), 0);
        let socket = create_socket(bind_addr)?;
        log::debug!(
            "[Discovery] Bound query socket on {}",
            socket.local_addr().map_err(DiscoveryError::SocketBind)?
        );
        Ok(Self {
            socket,
            target: config.target,
        })
    }

    /// Local address of the query socket.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends one query for `service_id` and collects replies.
    ///
    /// Each receive waits up to `wait`; the first silent interval ends the
    /// query. When `predicate` accepts a newly seen core the query stops early
    /// and returns everything collected so far.
    pub async fn query<F>(
        &mut self,
        service_id: &str,
        wait: Duration,
        mut predicate: F,
    ) -> Result<Vec<DiscoveryResult>, DiscoveryError>
    where
        F: FnMut(&DiscoveryResult) -> bool,
    {
        let tid = uuid::Uuid::new_v4().to_string();
        let datagram = build_query(service_id, &tid)?;

        log::trace!(
            "[Discovery] Query service_id={} tid={} -> {}",
            service_id,
            tid,
            self.target
        );
        self.socket
            .send_to(&datagram, self.target)
            .await
            .map_err(DiscoveryError::Send)?;

        let mut collector = ReplyCollector::default();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        let mut window = ReceiveWindow::new(wait);
        loop {
            let received = timeout(window.remaining(), self.socket.recv_from(&mut buf)).await;
            let (len, source) = match received {
                Err(_) => break,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    log::warn!("[Discovery] Receive error: {}", e);
                    if !window.on_error() {
                        log::warn!("[Discovery] Giving up query after repeated receive errors");
                        break;
                    }
                    continue;
                }
            };
            window.on_datagram();

            match collector.accept(source.ip(), &buf[..len]) {
                Accepted::Ignored => {
                    log::debug!(
                        "[Discovery] Ignoring {} byte datagram from {}",
                        len,
                        source
                    );
                }
                Accepted::Duplicate => {
                    log::trace!("[Discovery] Duplicate reply from {}", source.ip());
                }
                Accepted::New(index) => {
                    let Some(result) = collector.get(index) else {
                        continue;
                    };
                    log::info!(
                        "[Discovery] Found core '{}' at {}:{} (version {})",
                        result.core_name,
                        result.core_address,
                        result.http_port,
                        result.display_version
                    );
                    if predicate(result) {
                        break;
                    }
                }
            }
        }

        Ok(collector.into_results())
    }
}

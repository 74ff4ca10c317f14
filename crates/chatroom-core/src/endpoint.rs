//! Datagram endpoint: socket ownership and request dispatch.
//!
//! The endpoint owns one UDP socket and the request table. Client and
//! server each run their own receive loop on top of it: responses are
//! routed into the table, requests and events go to the op handler.
//! There is no payload retransmission; loss is masked by request
//! timeouts and idempotent heartbeats.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time;

use crate::error::{Error, Result};
use crate::protocol::{Datagram, Frame};
use crate::request::RequestTable;

/// Socket plus correlation state, shared by clones.
#[derive(Clone)]
pub struct Endpoint {
    sock: Arc<UdpSocket>,
    requests: Arc<RequestTable>,
    local_addr: SocketAddr,
}

impl Endpoint {
    /// Bind a UDP socket and wrap it.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let sock = UdpSocket::bind(addr).await?;
        let local_addr = sock.local_addr()?;
        Ok(Self {
            sock: Arc::new(sock),
            requests: Arc::new(RequestTable::new()),
            local_addr,
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The endpoint's request table.
    pub fn requests(&self) -> &RequestTable {
        &self.requests
    }

    /// Receive and decode one datagram.
    ///
    /// Decode failures surface as `MalformedFrame`; the caller drops the
    /// datagram and keeps the loop running.
    pub async fn recv_datagram(&self, buf: &mut [u8]) -> Result<(Datagram, SocketAddr)> {
        let (len, addr) = self.sock.recv_from(buf).await?;
        let dgram = Datagram::decode(&buf[..len])?;
        Ok((dgram, addr))
    }

    /// Encode and send one datagram.
    pub async fn send_datagram(&self, dgram: &Datagram, addr: SocketAddr) -> Result<()> {
        self.send_bytes(&dgram.encode(), addr).await
    }

    /// Send pre-encoded datagram bytes.
    pub async fn send_bytes(&self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        self.sock.send_to(bytes, addr).await?;
        Ok(())
    }

    /// Issue one correlated request and await its response.
    ///
    /// `seal` receives the freshly minted correlation id and returns the
    /// encoded datagram bytes — the caller seals under its own session
    /// lock so the endpoint never holds it across an await point.
    pub async fn request<F>(&self, addr: SocketAddr, timeout: Duration, seal: F) -> Result<Frame>
    where
        F: FnOnce(u32) -> Result<Vec<u8>>,
    {
        let (id, rx) = self.requests.allocate()?;
        let bytes = match seal(id) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.requests.cancel(id);
                return Err(err);
            }
        };
        if let Err(err) = self.send_bytes(&bytes, addr).await {
            self.requests.cancel(id);
            return Err(err);
        }
        match time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(Error::EndpointClosed),
            Err(_) => {
                self.requests.cancel(id);
                Err(Error::RequestTimeout)
            }
        }
    }

    /// Shut down request dispatch: every outstanding slot completes with
    /// `EndpointClosed` and new requests are refused.
    pub fn close(&self) {
        self.requests.close();
    }
}

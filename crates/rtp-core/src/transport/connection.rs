use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;
use crate::Result;

/// A datagram endpoint used by the RTP/RTCP transports
#[async_trait]
pub trait DatagramConnection: Send + Sync {
    /// Send one datagram to the configured remote endpoint
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Receive one datagram into `buf`.
    ///
    /// A zero `timeout` blocks until data arrives or the connection is
    /// closed. Fails with [`Error::Timeout`] or [`Error::Closed`].
    async fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the connection, waking any pending receive. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    fn local_addr(&self) -> Result<SocketAddr>;
}

/// UDP implementation of [`DatagramConnection`]
pub struct UdpConnection {
    socket: UdpSocket,
    remote: RwLock<Option<SocketAddr>>,
    closed: CancellationToken,
}

impl UdpConnection {
    /// Bind to a local address; port 0 picks an ephemeral port
    pub async fn bind(local: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        debug!("Datagram connection bound to {}", socket.local_addr()?);
        Ok(Self {
            socket,
            remote: RwLock::new(None),
            closed: CancellationToken::new(),
        })
    }

    /// Bind to a local address and target `remote` for sending
    pub async fn open(local: SocketAddr, remote: SocketAddr) -> Result<Self> {
        let connection = Self::bind(local).await?;
        connection.set_remote(remote);
        Ok(connection)
    }

    pub fn set_remote(&self, remote: SocketAddr) {
        *self.remote.write() = Some(remote);
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        *self.remote.read()
    }
}

#[async_trait]
impl DatagramConnection for UdpConnection {
    async fn send(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let remote = self
            .remote()
            .ok_or_else(|| Error::InvalidParameter("no remote endpoint".into()))?;
        self.socket.send_to(data, remote).await?;
        Ok(())
    }

    async fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let read = async {
            tokio::select! {
                _ = self.closed.cancelled() => Err(Error::Closed),
                result = self.socket.recv_from(buf) => {
                    result.map(|(len, _)| len).map_err(Error::from)
                }
            }
        };

        if timeout.is_zero() {
            read.await
        } else {
            tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| Error::Timeout(timeout))?
        }
    }

    fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("Datagram connection closed");
            self.closed.cancel();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

//! Byte transports a session runs its transactions over.

use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use log::{debug, info};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpSocket, TcpStream},
};

use crate::{error::Error, io_err, res, utils::Result};

/// Where a transport connects from and to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    /// Local address to bind before connecting; `None` lets the OS choose
    pub station: Option<SocketAddr>,
    /// Subnet of the station address
    pub subnet_mask: Option<Ipv4Addr>,
    pub remote: SocketAddr,
}

impl Endpoints {
    pub fn remote(remote: SocketAddr) -> Endpoints {
        Endpoints {
            station: None,
            subnet_mask: None,
            remote,
        }
    }

    /// Whether the remote address lies on the station's subnet.
    ///
    /// `None` when either the station address or the mask is unknown.
    pub fn is_local(&self) -> Option<bool> {
        let mask = u32::from(self.subnet_mask?);
        match (self.station?, self.remote) {
            (SocketAddr::V4(station), SocketAddr::V4(remote)) => {
                Some(u32::from(*station.ip()) & mask == u32::from(*remote.ip()) & mask)
            }
            _ => None,
        }
    }
}

/// A reliable byte stream to a 9P server.
///
/// Implementations handle fragmentation; callers only see "send all of these bytes"
/// and "receive up to this many bytes". Returning `Ok(0)` from [`Transport::receive`]
/// means the peer closed the stream.
#[async_trait]
pub trait Transport: Send {
    /// Record the endpoints to use on the next [`Transport::connect`]
    async fn configure(&mut self, endpoints: &Endpoints) -> Result<()>;

    async fn connect(&mut self) -> Result<()>;

    /// Send every byte of `buf`
    async fn transmit(&mut self, buf: &[u8]) -> Result<()>;

    /// Receive at most `buf.len()` bytes
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Shut the stream down; later calls fail
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

enum TcpState {
    Unconfigured,
    Configured(Endpoints),
    Connected(TcpStream),
    Closed,
}

/// Transport over a tokio TCP stream
pub struct TcpTransport {
    state: TcpState,
}

impl TcpTransport {
    pub fn new() -> TcpTransport {
        TcpTransport {
            state: TcpState::Unconfigured,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        match self.state {
            TcpState::Connected(ref mut stream) => Ok(stream),
            _ => res!(io_err!(NotConnected, "transport is not connected")),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn configure(&mut self, endpoints: &Endpoints) -> Result<()> {
        if let TcpState::Connected(_) = self.state {
            return Err(Error::InvalidParameter(
                "transport already connected".to_owned(),
            ));
        }
        if endpoints.is_local() == Some(false) {
            info!(
                "{} is outside the station subnet, relying on routing",
                endpoints.remote
            );
        }

        self.state = TcpState::Configured(endpoints.clone());
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let endpoints = match self.state {
            TcpState::Configured(ref endpoints) => endpoints.clone(),
            TcpState::Connected(_) => return Ok(()),
            _ => return res!(io_err!(NotConnected, "transport is not configured")),
        };

        let socket = match endpoints.remote {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(station) = endpoints.station {
            socket.bind(station)?;
        }

        let stream = socket.connect(endpoints.remote).await?;
        stream.set_nodelay(true)?;
        info!("connected: {:?} -> {:?}", stream.local_addr()?, endpoints.remote);

        self.state = TcpState::Connected(stream);
        Ok(())
    }

    async fn transmit(&mut self, buf: &[u8]) -> Result<()> {
        self.stream()?.write_all(buf).await?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream()?.read(buf).await?)
    }

    async fn close(&mut self) -> Result<()> {
        if let TcpState::Connected(ref mut stream) = self.state {
            debug!("closing {:?}", stream.peer_addr());
            stream.shutdown().await?;
        }
        self.state = TcpState::Closed;
        Ok(())
    }
}

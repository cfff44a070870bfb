use std::net::{SocketAddr, ToSocketAddrs};

use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Split a `proto!addr!port` dial string
pub fn parse_proto(arg: &str) -> Option<(&str, &str, &str)> {
    let mut split = arg.split('!');
    let (proto, addr, port) = (split.next()?, split.next()?, split.next()?);
    if split.next().is_some() {
        return None;
    }

    Some((proto, addr, port))
}

/// Parse a remote address given either as `tcp!host!port` or `host:port`.
///
/// A bare host gets the v9fs default port.
pub fn parse_dial(arg: &str, default_port: u16) -> Result<SocketAddr> {
    let invalid = || error::Error::InvalidParameter(format!("address {:?}", arg));

    let (host, port) = match parse_proto(arg) {
        Some(("tcp", host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        Some(_) => return Err(invalid()),
        None => match arg.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (arg, default_port),
        },
    };
    if host.is_empty() {
        return Err(invalid());
    }

    (host, port)
        .to_socket_addrs()
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)
}

//! Connection settings for a volume.

use std::{
    env,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use crate::{
    error::Error,
    fcall::{DEFAULT_MSIZE, MIN_MSIZE, V9FS_PORT},
    transport::Endpoints,
    utils::{Result, parse_dial},
};

pub const ENV_STATION_ADDR: &str = "P9_STATION_ADDR";
pub const ENV_SUBNET_MASK: &str = "P9_SUBNET_MASK";
pub const ENV_REMOTE_ADDR: &str = "P9_REMOTE_ADDR";
pub const ENV_UNAME: &str = "P9_UNAME";
pub const ENV_ANAME: &str = "P9_ANAME";
pub const ENV_MSIZE: &str = "P9_MSIZE";
pub const ENV_TIMEOUT_MS: &str = "P9_TIMEOUT_MS";

pub const DEFAULT_UNAME: &str = "root";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub station: Option<SocketAddr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub remote: SocketAddr,
    /// User name sent in `TAttach`
    pub uname: String,
    /// Export name sent in `TAttach`
    pub aname: String,
    /// Proposed in `TVersion`; the server may lower it
    pub msize: u32,
    /// Per-transaction limit; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Config {
    pub fn new(remote: SocketAddr) -> Config {
        Config {
            station: None,
            subnet_mask: None,
            remote,
            uname: DEFAULT_UNAME.to_owned(),
            aname: String::new(),
            msize: DEFAULT_MSIZE,
            timeout: None,
        }
    }

    /// Read the `P9_*` variables from the process environment
    pub fn from_env() -> Result<Config> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key/value source using the `P9_*` names.
    ///
    /// Only the remote address is required.
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let remote = get(ENV_REMOTE_ADDR)
            .ok_or_else(|| Error::InvalidParameter(format!("{} is not set", ENV_REMOTE_ADDR)))?;
        let mut config = Config::new(parse_dial(remote.trim(), V9FS_PORT)?);

        if let Some(station) = get(ENV_STATION_ADDR) {
            config.station = Some(SocketAddr::V4(parse_ipv4_addr(&station, 0)?));
        }
        if let Some(mask) = get(ENV_SUBNET_MASK) {
            config.subnet_mask = Some(parse_ipv4(&mask)?);
        }
        if let Some(uname) = get(ENV_UNAME) {
            config.uname = uname;
        }
        if let Some(aname) = lookup(ENV_ANAME) {
            config.aname = aname;
        }
        if let Some(msize) = get(ENV_MSIZE) {
            config.msize = parse_number(ENV_MSIZE, &msize)?;
        }
        if let Some(ms) = get(ENV_TIMEOUT_MS) {
            config.timeout = Some(Duration::from_millis(parse_number(ENV_TIMEOUT_MS, &ms)?));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.msize < MIN_MSIZE {
            return Err(Error::InvalidParameter(format!(
                "msize {} is below {}",
                self.msize, MIN_MSIZE
            )));
        }
        if self.uname.is_empty() {
            return Err(Error::InvalidParameter("empty user name".to_owned()));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidParameter("zero timeout".to_owned()));
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            station: self.station,
            subnet_mask: self.subnet_mask,
            remote: self.remote,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidParameter(format!("{}={:?}", key, value)))
}

/// Dotted-quad IPv4 address
pub fn parse_ipv4(value: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidParameter(format!("IPv4 address {:?}", value)))
}

/// Dotted-quad IPv4 address with an optional `:port`
pub fn parse_ipv4_addr(value: &str, default_port: u16) -> Result<SocketAddrV4> {
    let value = value.trim();
    let (ip, port) = match value.split_once(':') {
        Some((ip, port)) => (
            ip,
            port.parse()
                .map_err(|_| Error::InvalidParameter(format!("port in {:?}", value)))?,
        ),
        None => (value, default_port),
    };
    Ok(SocketAddrV4::new(parse_ipv4(ip)?, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = Config::from_lookup(lookup(&[(ENV_REMOTE_ADDR, "10.0.2.2")])).unwrap();
        assert_eq!(c.remote, "10.0.2.2:564".parse().unwrap());
        assert_eq!(c.uname, "root");
        assert_eq!(c.aname, "");
        assert_eq!(c.msize, 8192);
        assert_eq!(c.timeout, None);
        assert_eq!(c.station, None);
    }

    #[test]
    fn everything_set() {
        let c = Config::from_lookup(lookup(&[
            (ENV_STATION_ADDR, "192.168.0.5:4000"),
            (ENV_SUBNET_MASK, "255.255.255.0"),
            (ENV_REMOTE_ADDR, "tcp!192.168.0.1!5640"),
            (ENV_UNAME, "alice"),
            (ENV_ANAME, "/srv/export"),
            (ENV_MSIZE, "65536"),
            (ENV_TIMEOUT_MS, "1500"),
        ]))
        .unwrap();
        assert_eq!(c.station, Some("192.168.0.5:4000".parse().unwrap()));
        assert_eq!(c.subnet_mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(c.remote, "192.168.0.1:5640".parse().unwrap());
        assert_eq!(c.uname, "alice");
        assert_eq!(c.aname, "/srv/export");
        assert_eq!(c.msize, 65536);
        assert_eq!(c.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(c.endpoints().is_local(), Some(true));
    }

    #[test]
    fn rejects_bad_values() {
        let bad = |pairs: &[(&str, &str)]| {
            matches!(
                Config::from_lookup(lookup(pairs)),
                Err(Error::InvalidParameter(_))
            )
        };
        assert!(bad(&[]));
        assert!(bad(&[(ENV_REMOTE_ADDR, "10.0.2.2:http")]));
        assert!(bad(&[(ENV_REMOTE_ADDR, "10.0.2.2"), (ENV_STATION_ADDR, "10.0.2")]));
        assert!(bad(&[(ENV_REMOTE_ADDR, "10.0.2.2"), (ENV_SUBNET_MASK, "mask")]));
        assert!(bad(&[(ENV_REMOTE_ADDR, "10.0.2.2"), (ENV_MSIZE, "64")]));
        assert!(bad(&[(ENV_REMOTE_ADDR, "10.0.2.2"), (ENV_TIMEOUT_MS, "0")]));
    }

    #[test]
    fn ipv4_with_port() {
        assert_eq!(
            parse_ipv4_addr("10.1.2.3:99", 0).unwrap(),
            SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 99)
        );
        assert_eq!(parse_ipv4_addr("10.1.2.3", 7).unwrap().port(), 7);
        assert!(parse_ipv4_addr("10.1.2.3:", 7).is_err());
    }
}

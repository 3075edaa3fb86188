use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::common::Id;

use super::socket::DEFAULT_WRITE_TIMEOUT;
use super::DEFAULT_REQUEST_TIMEOUT;

/// Default number of worker threads handling inbound datagrams.
pub const DEFAULT_WORKERS: usize = 4;
/// Default number of keys kept in the value store.
pub const DEFAULT_MAX_VALUES: usize = 2000;
/// Default number of holders kept per key in the value store.
pub const DEFAULT_MAX_HOLDERS: usize = 500;

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// Node Id.
    ///
    /// Defaults to None, where a random Id is generated.
    pub id: Option<Id>,
    /// Address to bind the UDP socket on.
    ///
    /// Defaults to `0.0.0.0`
    pub bind_address: IpAddr,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where [super::socket::DEFAULT_PORT] is tried first
    /// and any free port is used if it is taken.
    pub port: Option<u16>,
    /// Bootstrap nodes as `host:port` strings.
    ///
    /// Defaults to an empty list.
    pub bootstrap: Vec<String>,
    /// How long a caller waits on a transaction before giving up.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Write deadline of each outbound datagram.
    ///
    /// Defaults to [DEFAULT_WRITE_TIMEOUT]
    pub write_timeout: Duration,
    /// Number of threads handling inbound datagrams concurrently.
    ///
    /// Defaults to [DEFAULT_WORKERS]
    pub workers: usize,
    /// Maximum number of keys in the value store.
    ///
    /// Defaults to [DEFAULT_MAX_VALUES]
    pub max_values: usize,
    /// Maximum number of holders per key in the value store.
    ///
    /// Defaults to [DEFAULT_MAX_HOLDERS]
    pub max_holders: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: None,
            bootstrap: vec![],
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            workers: DEFAULT_WORKERS,
            max_values: DEFAULT_MAX_VALUES,
            max_holders: DEFAULT_MAX_HOLDERS,
        }
    }
}

//! Host resolution with a process-wide "last address that worked" cache.
//!
//! A host may resolve to several addresses of differing reachability (IPv4
//! and IPv6, say). Once one address has accepted a connection it is tried
//! first on every later connect; the entry is dropped as soon as it fails.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Number of endpoints remembered by the global resolver.
const CACHE_CAPACITY: usize = 256;

static GLOBAL: Lazy<EndpointResolver> = Lazy::new(|| EndpointResolver::new(CACHE_CAPACITY));

/// A server address as configured: host name and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolves endpoints and remembers the last successful address of each.
pub struct EndpointResolver {
    cache: Mutex<LruCache<Endpoint, IpAddr>>,
}

impl EndpointResolver {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// The resolver shared by every pool in the process.
    pub fn global() -> &'static EndpointResolver {
        &GLOBAL
    }

    /// Address cached for `endpoint`, if any.
    pub fn cached(&self, endpoint: &Endpoint) -> Option<IpAddr> {
        self.cache.lock().peek(endpoint).copied()
    }

    /// Drop the cached address of `endpoint`.
    pub fn forget(&self, endpoint: &Endpoint) {
        self.cache.lock().pop(endpoint);
    }

    /// Open a TCP connection to `endpoint`.
    ///
    /// Tries the cached address first, then every resolved address in order.
    /// Fails with [`Error::ConnectFailed`] carrying the last I/O error.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream> {
        if let Some(ip) = self.cached(endpoint) {
            match TcpStream::connect(SocketAddr::new(ip, endpoint.port)).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(%endpoint, %ip, error = %e, "cached address failed, resolving again");
                    self.forget(endpoint);
                }
            }
        }

        let addrs = match lookup_host((endpoint.host.as_str(), endpoint.port)).await {
            Ok(addrs) => addrs,
            Err(e) => return Err(connect_failed(endpoint, e)),
        };
        self.connect_first(endpoint, addrs).await
    }

    /// Connect to the first reachable address and cache it for `endpoint`.
    async fn connect_first(
        &self,
        endpoint: &Endpoint,
        addrs: impl IntoIterator<Item = SocketAddr>,
    ) -> Result<TcpStream> {
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(%endpoint, %addr, "connected");
                    self.cache.lock().put(endpoint.clone(), addr.ip());
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(%endpoint, %addr, error = %e, "address unreachable");
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        });
        Err(connect_failed(endpoint, error))
    }
}

fn connect_failed(endpoint: &Endpoint, source: io::Error) -> Error {
    Error::ConnectFailed {
        host: endpoint.host.clone(),
        port: endpoint.port,
        source,
    }
}

//! Upstream peer selection
//!
//! When the engine is about to connect a request to an upstream it
//! calls [`WorkerContext::select_peer`].  A target given with
//! [`Subrequest::target`] wins; otherwise the resolver registered for
//! the upstream id picks the address.  The choice is copied into the
//! request's arena via [`Engine::set_peer`] in the fixed-layout
//! [`PeerSelection`] form.
//!
//! [`Engine::set_peer`]: trait.Engine.html#tymethod.set_peer
//! [`PeerSelection`]: struct.PeerSelection.html
//! [`Subrequest::target`]: struct.Subrequest.html#method.target
//! [`WorkerContext::select_peer`]: struct.WorkerContext.html#method.select_peer

use crate::log::LogLevel;
use crate::task::guarded;
use crate::{Method, ReqId, WorkerContext};
use std::borrow::Cow;
use std::fmt;
use std::fmt::Arguments;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Address family of a [`PeerSelection`]
///
/// [`PeerSelection`]: struct.PeerSelection.html
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Family {
    V4 = 4,
    V6 = 6,
}

/// A chosen upstream address in the layout the engine stores
///
/// Address bytes are in network order, using the first 4 bytes for
/// IPv4.  The port is stored big-endian.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(C)]
pub struct PeerSelection {
    family: Family,
    addr: [u8; 16],
    port: [u8; 2],
}

impl PeerSelection {
    pub fn v4(ip: Ipv4Addr, port: u16) -> Self {
        let mut addr = [0; 16];
        addr[..4].copy_from_slice(&ip.octets());
        Self {
            family: Family::V4,
            addr,
            port: port.to_be_bytes(),
        }
    }

    pub fn v6(ip: Ipv6Addr, port: u16) -> Self {
        Self {
            family: Family::V6,
            addr: ip.octets(),
            port: port.to_be_bytes(),
        }
    }

    /// Parse `"1.2.3.4:80"` or `"[::1]:80"`.  The port is whatever
    /// follows the last colon.
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.rsplit_once(':')?;
        Self::from_host_port(host, port.parse().ok()?)
    }

    /// Build from a literal IP address, with or without the brackets
    /// used around IPv6 addresses
    pub fn from_host_port(host: &str, port: u16) -> Option<Self> {
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.contains(':') {
            host.parse::<Ipv6Addr>().ok().map(|ip| Self::v6(ip, port))
        } else {
            host.parse::<Ipv4Addr>().ok().map(|ip| Self::v4(ip, port))
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Address bytes in network order: 4 for IPv4, 16 for IPv6
    pub fn addr_bytes(&self) -> &[u8] {
        match self.family {
            Family::V4 => &self.addr[..4],
            Family::V6 => &self.addr[..],
        }
    }

    /// Port in network byte order
    pub fn port_bytes(&self) -> [u8; 2] {
        self.port
    }

    pub fn port(&self) -> u16 {
        u16::from_be_bytes(self.port)
    }

    pub fn ip(&self) -> IpAddr {
        match self.family {
            Family::V4 => IpAddr::V4(Ipv4Addr::new(
                self.addr[0],
                self.addr[1],
                self.addr[2],
                self.addr[3],
            )),
            Family::V6 => IpAddr::V6(Ipv6Addr::from(self.addr)),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip(), self.port())
    }
}

impl From<SocketAddr> for PeerSelection {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(a) => a.into(),
            SocketAddr::V6(a) => a.into(),
        }
    }
}

impl From<SocketAddrV4> for PeerSelection {
    fn from(addr: SocketAddrV4) -> Self {
        Self::v4(*addr.ip(), addr.port())
    }
}

impl From<SocketAddrV6> for PeerSelection {
    fn from(addr: SocketAddrV6) -> Self {
        Self::v6(*addr.ip(), addr.port())
    }
}

/// Displays as the engine's peer name: `1.2.3.4:80` or `[::1]:80`
impl fmt::Display for PeerSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip() {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port()),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port()),
        }
    }
}

/// Result of [`WorkerContext::select_peer`]
///
/// [`WorkerContext::select_peer`]: struct.WorkerContext.html#method.select_peer
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PeerDecision {
    /// Stored in the request arena.  The engine connects to it.
    Selected(PeerSelection),
    /// No peer.  The engine declines the upstream.
    Declined,
    /// Storing the peer failed.  The engine treats this as an error.
    Failed,
}

/// Read-only view of a request given to peer resolvers
pub struct PeerContext<'a, D: 'static> {
    cx: &'a WorkerContext<D>,
    req: ReqId,
    upstream_id: u64,
}

impl<'a, D: 'static> PeerContext<'a, D> {
    pub fn req(&self) -> ReqId {
        self.req
    }

    pub fn upstream_id(&self) -> u64 {
        self.upstream_id
    }

    pub fn method(&self) -> Method {
        Method::from_mask(self.cx.engine.method(self.req))
    }

    pub fn uri(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.cx.engine.uri(self.req))
    }

    /// First request header with this name, compared
    /// case-insensitively
    pub fn header(&self, name: &str) -> Option<String> {
        let mut found = None;
        self.cx.engine.visit_headers(self.req, &mut |k, v| {
            if found.is_none() && k.eq_ignore_ascii_case(name.as_bytes()) {
                found = Some(String::from_utf8_lossy(v).into_owned());
            }
        });
        found
    }

    pub fn data(&self) -> &'a D {
        self.cx.data()
    }

    pub fn log(&self, level: LogLevel, fmt: Arguments<'_>) {
        self.cx.log_req(level, self.req, fmt);
    }
}

impl<D: 'static> WorkerContext<D> {
    /// Upstream peer hook.  Picks the peer for `req` on the upstream
    /// with id `upstream_id` and stores it in the request arena.
    pub fn select_peer(&mut self, req: ReqId, upstream_id: u64) -> PeerDecision {
        let selection = match self.targets.get(&req) {
            Some(target) => *target,
            None => match self.resolve_peer(req, upstream_id) {
                Some(selection) => selection,
                None => return PeerDecision::Declined,
            },
        };
        match self.engine.set_peer(req, &selection) {
            Ok(()) => PeerDecision::Selected(selection),
            Err(e) => {
                self.log_req(
                    LogLevel::Error,
                    req,
                    format_args!("failed to store peer {}: {}", selection, e),
                );
                PeerDecision::Failed
            }
        }
    }

    fn resolve_peer(&self, req: ReqId, upstream_id: u64) -> Option<PeerSelection> {
        let resolver = match self.routes.resolver(upstream_id) {
            Some(resolver) => resolver,
            None => {
                self.log_req(
                    LogLevel::Error,
                    req,
                    format_args!(
                        "unable to find handler related to the upstream {}",
                        upstream_id
                    ),
                );
                return None;
            }
        };
        let pcx = PeerContext {
            cx: self,
            req,
            upstream_id,
        };
        match guarded(|| resolver(&pcx)) {
            Ok(Some(addr)) => Some(addr.into()),
            Ok(None) => {
                self.log_req(
                    LogLevel::Warn,
                    req,
                    format_args!("no server provided for upstream {}", upstream_id),
                );
                None
            }
            Err(msg) => {
                self.log_req(
                    LogLevel::Error,
                    req,
                    format_args!("failed to provide server for upstream {}: {}", upstream_id, msg),
                );
                None
            }
        }
    }
}

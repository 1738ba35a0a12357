//! Peer list, per-origin routing table and hostname lookups.
//!
//! A peer is identified by its socket address alone. Peers are added on first
//! contact and never removed.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use rand::seq::SliceRandom;
use rand::Rng;

/// Next hop toward an origin and the freshest seqno seen on that route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub next_hop: SocketAddr,
    pub seqno: u32,
}

/// Outcome of `update_route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    /// First route for this origin.
    Created,
    Replaced,
    Kept,
}

/// Outcome of adding a peer from user/config input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddPeer {
    Added(SocketAddr),
    AlreadyKnown(SocketAddr),
    /// Hostname must be resolved by the host; report back with `on_host_resolved`.
    Lookup { host: String, port: u16 },
    /// A lookup for this hostname is already outstanding; the port joins it.
    LookupPending,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PeerAddrError {
    #[error("peer must have the form host:port")]
    MissingPort,
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
    #[error("malformed peer address {0:?}")]
    Malformed(String),
    #[error("{0} is not in the address family of the local socket")]
    WrongFamily(SocketAddr),
}

#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: Vec<SocketAddr>,
    routes: HashMap<String, Route>,
    /// Ports waiting on each outstanding hostname lookup.
    pending_lookups: HashMap<String, Vec<u16>>,
    local: Option<SocketAddr>,
    aliases: Vec<SocketAddr>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Our own bound address; never added as a peer. Peers must share its address family.
    pub fn set_local_addr(&mut self, addr: SocketAddr) {
        self.local = Some(addr);
        self.peers.retain(|p| *p != addr && p.is_ipv4() == addr.is_ipv4());
    }

    /// Another address this node answers on, e.g. a LAN interface.
    pub fn add_local_alias(&mut self, addr: SocketAddr) {
        if !self.aliases.contains(&addr) {
            self.aliases.push(addr);
        }
        self.peers.retain(|p| *p != addr);
    }

    fn is_local(&self, addr: &SocketAddr) -> bool {
        self.local.as_ref() == Some(addr) || self.aliases.contains(addr)
    }

    fn reachable(&self, addr: &SocketAddr) -> bool {
        self.local.map_or(true, |l| l.is_ipv4() == addr.is_ipv4())
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Parse `host:port`. Literal addresses register immediately; hostnames become a lookup.
    pub fn add_peer_by_address_or_hostname(&mut self, spec: &str) -> Result<AddPeer, PeerAddrError> {
        let spec = spec.trim();
        if let Ok(addr) = spec.parse::<SocketAddr>() {
            if addr.port() == 0 {
                return Err(PeerAddrError::InvalidPort(spec.to_string()));
            }
            return self.add_literal(addr);
        }
        let (host, port) = spec.split_once(':').ok_or(PeerAddrError::MissingPort)?;
        if host.is_empty() || port.contains(':') {
            return Err(PeerAddrError::Malformed(spec.to_string()));
        }
        let port: u16 = match port.parse() {
            Ok(p) if p != 0 => p,
            _ => return Err(PeerAddrError::InvalidPort(spec.to_string())),
        };
        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.add_literal(SocketAddr::new(ip, port));
        }
        let ports = self.pending_lookups.entry(host.to_string()).or_default();
        if !ports.is_empty() {
            if !ports.contains(&port) {
                ports.push(port);
            }
            return Ok(AddPeer::LookupPending);
        }
        ports.push(port);
        Ok(AddPeer::Lookup {
            host: host.to_string(),
            port,
        })
    }

    fn add_literal(&mut self, addr: SocketAddr) -> Result<AddPeer, PeerAddrError> {
        if !self.reachable(&addr) {
            return Err(PeerAddrError::WrongFamily(addr));
        }
        Ok(match self.find_or_add_peer(addr) {
            (a, true) => AddPeer::Added(a),
            (a, false) => AddPeer::AlreadyKnown(a),
        })
    }

    /// Complete a hostname lookup, registering every port that waited on it. Uses the
    /// first address in the local socket's family. Returns the peers newly added;
    /// stale or duplicate results (no pending entry) are ignored.
    pub fn on_host_resolved(
        &mut self,
        host: &str,
        result: Result<Vec<IpAddr>, String>,
    ) -> Vec<SocketAddr> {
        let Some(ports) = self.pending_lookups.remove(host) else {
            tracing::debug!(host, "ignoring result for lookup that is not pending");
            return Vec::new();
        };
        let addrs = match result {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::warn!(host, error = %e, "hostname lookup failed");
                return Vec::new();
            }
        };
        let Some(ip) = addrs.iter().copied().find(|ip| self.reachable(&SocketAddr::new(*ip, 0))) else {
            tracing::warn!(host, found = addrs.len(), "lookup returned no usable address");
            return Vec::new();
        };
        ports
            .into_iter()
            .filter_map(|port| match self.find_or_add_peer(SocketAddr::new(ip, port)) {
                (addr, true) => Some(addr),
                (_, false) => None,
            })
            .collect()
    }

    /// Existing peer or a newly registered one. Returns (peer, newly added).
    /// Our own addresses and addresses the socket cannot reach are never added.
    pub fn find_or_add_peer(&mut self, addr: SocketAddr) -> (SocketAddr, bool) {
        if self.peers.contains(&addr) || self.is_local(&addr) {
            return (addr, false);
        }
        if !self.reachable(&addr) {
            tracing::debug!(%addr, "skipping peer in other address family");
            return (addr, false);
        }
        self.peers.push(addr);
        tracing::debug!(%addr, "new peer");
        (addr, true)
    }

    /// Uniform choice among all peers.
    pub fn random_peer<R: Rng>(&self, rng: &mut R) -> Option<SocketAddr> {
        self.peers.choose(rng).copied()
    }

    /// Uniform choice among peers other than `exclude`; falls back to `exclude` if it is the only one.
    pub fn random_peer_except<R: Rng>(&self, rng: &mut R, exclude: SocketAddr) -> Option<SocketAddr> {
        let others: Vec<SocketAddr> = self.peers.iter().copied().filter(|p| *p != exclude).collect();
        others.choose(rng).copied().or_else(|| self.random_peer(rng))
    }

    /// Record that `origin` is reachable via `peer` at `seqno`. Replaces an existing
    /// route when the seqno is strictly greater, or equal and the rumor came direct.
    pub fn update_route(
        &mut self,
        origin: &str,
        peer: SocketAddr,
        seqno: u32,
        is_direct: bool,
    ) -> RouteUpdate {
        match self.routes.get_mut(origin) {
            None => {
                self.routes.insert(
                    origin.to_string(),
                    Route {
                        next_hop: peer,
                        seqno,
                    },
                );
                RouteUpdate::Created
            }
            Some(route) if seqno > route.seqno || (seqno == route.seqno && is_direct) => {
                route.next_hop = peer;
                route.seqno = seqno;
                RouteUpdate::Replaced
            }
            Some(_) => RouteUpdate::Kept,
        }
    }

    pub fn route(&self, origin: &str) -> Option<&Route> {
        self.routes.get(origin)
    }

    pub fn next_hop(&self, origin: &str) -> Option<SocketAddr> {
        self.routes.get(origin).map(|r| r.next_hop)
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn literal_address_registers_immediately() {
        let mut dir = PeerDirectory::new();
        let r = dir.add_peer_by_address_or_hostname("127.0.0.1:4000").unwrap();
        assert_eq!(r, AddPeer::Added(addr("127.0.0.1:4000")));
        let r = dir.add_peer_by_address_or_hostname("127.0.0.1:4000").unwrap();
        assert_eq!(r, AddPeer::AlreadyKnown(addr("127.0.0.1:4000")));
        assert_eq!(dir.peers().len(), 1);
        let r = dir.add_peer_by_address_or_hostname("[::1]:4001").unwrap();
        assert!(matches!(r, AddPeer::Added(_)));
    }

    #[test]
    fn bad_specs_are_rejected() {
        let mut dir = PeerDirectory::new();
        assert_eq!(
            dir.add_peer_by_address_or_hostname("localhost"),
            Err(PeerAddrError::MissingPort)
        );
        assert!(matches!(
            dir.add_peer_by_address_or_hostname("host:notaport"),
            Err(PeerAddrError::InvalidPort(_))
        ));
        assert!(matches!(
            dir.add_peer_by_address_or_hostname("host:0"),
            Err(PeerAddrError::InvalidPort(_))
        ));
        assert!(matches!(
            dir.add_peer_by_address_or_hostname(":4000"),
            Err(PeerAddrError::Malformed(_))
        ));
        assert!(matches!(
            dir.add_peer_by_address_or_hostname("a:1:2"),
            Err(PeerAddrError::Malformed(_))
        ));
        assert!(dir.is_empty());
    }

    #[test]
    fn hostname_lookup_round_trip() {
        let mut dir = PeerDirectory::new();
        let r = dir.add_peer_by_address_or_hostname("zoo.example:5000").unwrap();
        assert_eq!(
            r,
            AddPeer::Lookup {
                host: "zoo.example".into(),
                port: 5000
            }
        );
        assert_eq!(
            dir.add_peer_by_address_or_hostname("zoo.example:5000").unwrap(),
            AddPeer::LookupPending
        );
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(
            dir.on_host_resolved("zoo.example", Ok(vec![ip])),
            vec![addr("10.1.2.3:5000")]
        );
        // Duplicate completion is ignored.
        assert!(dir.on_host_resolved("zoo.example", Ok(vec![ip])).is_empty());
        assert_eq!(dir.peers().len(), 1);
    }

    #[test]
    fn failed_lookup_adds_nothing() {
        let mut dir = PeerDirectory::new();
        dir.add_peer_by_address_or_hostname("nowhere.invalid:1").unwrap();
        assert!(dir.on_host_resolved("nowhere.invalid", Err("nxdomain".into())).is_empty());
        assert!(dir.is_empty());
        // The pending entry is gone, so a retry issues a fresh lookup.
        assert!(matches!(
            dir.add_peer_by_address_or_hostname("nowhere.invalid:1").unwrap(),
            AddPeer::Lookup { .. }
        ));
    }

    #[test]
    fn one_lookup_registers_every_port_for_the_host() {
        let mut dir = PeerDirectory::new();
        assert!(matches!(
            dir.add_peer_by_address_or_hostname("zoo.example:1").unwrap(),
            AddPeer::Lookup { port: 1, .. }
        ));
        assert_eq!(
            dir.add_peer_by_address_or_hostname("zoo.example:2").unwrap(),
            AddPeer::LookupPending
        );
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(
            dir.on_host_resolved("zoo.example", Ok(vec![ip])),
            vec![addr("10.1.2.3:1"), addr("10.1.2.3:2")]
        );
        assert_eq!(dir.peers(), &[addr("10.1.2.3:1"), addr("10.1.2.3:2")]);
    }

    #[test]
    fn ipv4_socket_refuses_ipv6_peers() {
        let mut dir = PeerDirectory::new();
        dir.set_local_addr(addr("127.0.0.1:9000"));
        assert_eq!(
            dir.add_peer_by_address_or_hostname("[::1]:4001"),
            Err(PeerAddrError::WrongFamily(addr("[::1]:4001")))
        );
        assert_eq!(dir.find_or_add_peer(addr("[::1]:4002")), (addr("[::1]:4002"), false));
        assert!(dir.is_empty());

        dir.add_peer_by_address_or_hostname("dual.example:5000").unwrap();
        let v6: IpAddr = "::1".parse().unwrap();
        let v4: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(
            dir.on_host_resolved("dual.example", Ok(vec![v6, v4])),
            vec![addr("10.0.0.7:5000")]
        );

        dir.add_peer_by_address_or_hostname("v6only.example:5000").unwrap();
        assert!(dir.on_host_resolved("v6only.example", Ok(vec![v6])).is_empty());
        assert_eq!(dir.peers().len(), 1);
    }

    #[test]
    fn local_aliases_are_never_peers() {
        let mut dir = PeerDirectory::new();
        dir.set_local_addr(addr("127.0.0.1:9000"));
        let lan = addr("192.168.1.20:9000");
        dir.find_or_add_peer(lan);
        dir.add_local_alias(lan);
        assert!(dir.is_empty());
        assert_eq!(dir.find_or_add_peer(lan), (lan, false));
        assert!(dir.is_empty());
    }

    #[test]
    fn random_peer_on_empty_set_is_none() {
        let dir = PeerDirectory::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(dir.random_peer(&mut rng), None);
    }

    #[test]
    fn random_peer_except_avoids_excluded() {
        let mut dir = PeerDirectory::new();
        let a = addr("127.0.0.1:1");
        let b = addr("127.0.0.1:2");
        dir.find_or_add_peer(a);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(dir.random_peer_except(&mut rng, a), Some(a));
        dir.find_or_add_peer(b);
        for _ in 0..20 {
            assert_eq!(dir.random_peer_except(&mut rng, a), Some(b));
        }
    }

    #[test]
    fn local_address_is_never_a_peer() {
        let mut dir = PeerDirectory::new();
        let me = addr("127.0.0.1:9000");
        dir.find_or_add_peer(me);
        dir.set_local_addr(me);
        assert!(dir.is_empty());
        assert_eq!(dir.find_or_add_peer(me), (me, false));
        assert!(dir.is_empty());
    }

    #[test]
    fn direct_route_wins_tie_in_either_order() {
        let direct = addr("127.0.0.1:1");
        let relayed = addr("127.0.0.1:2");

        let mut dir = PeerDirectory::new();
        assert_eq!(dir.update_route("O", relayed, 5, false), RouteUpdate::Created);
        assert_eq!(dir.update_route("O", direct, 5, true), RouteUpdate::Replaced);
        assert_eq!(dir.next_hop("O"), Some(direct));

        let mut dir = PeerDirectory::new();
        dir.update_route("O", direct, 5, true);
        assert_eq!(dir.update_route("O", relayed, 5, false), RouteUpdate::Kept);
        assert_eq!(dir.next_hop("O"), Some(direct));
    }

    #[test]
    fn fresher_route_always_wins() {
        let mut dir = PeerDirectory::new();
        dir.update_route("O", addr("127.0.0.1:1"), 5, true);
        assert_eq!(
            dir.update_route("O", addr("127.0.0.1:2"), 6, false),
            RouteUpdate::Replaced
        );
        assert_eq!(
            dir.update_route("O", addr("127.0.0.1:3"), 4, true),
            RouteUpdate::Kept
        );
        assert_eq!(dir.route("O").unwrap().seqno, 6);
        assert_eq!(dir.origins().count(), 1);
    }
}

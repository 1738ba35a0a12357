//! In-memory network of cores for multi-node tests. Datagrams are delivered in FIFO
//! order, optionally dropping some.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::config::CoreConfig;
use crate::core::{OutboundAction, RumorCore};

const DELIVERY_CAP: usize = 200_000;

pub struct SimNet {
    pub nodes: Vec<RumorCore>,
    addrs: Vec<SocketAddr>,
    in_flight: VecDeque<(usize, SocketAddr, Vec<u8>)>,
    /// Non-datagram actions per node, in arrival order.
    pub events: Vec<Vec<OutboundAction>>,
    /// Drop every n-th datagram (0 = lossless).
    pub drop_every: usize,
    delivered: usize,
}

impl SimNet {
    /// `n` nodes named N0..N{n-1}, each on its own loopback port.
    pub fn new(n: usize) -> Self {
        Self::with_config(n, |_| CoreConfig::default())
    }

    pub fn with_config(n: usize, config: impl Fn(usize) -> CoreConfig) -> Self {
        let mut nodes = Vec::with_capacity(n);
        let mut addrs = Vec::with_capacity(n);
        for i in 0..n {
            let mut cfg = config(i);
            cfg.origin = Some(format!("N{i}"));
            let mut core = RumorCore::with_seed(cfg, 1000 + i as u64).unwrap();
            let addr = SocketAddr::from(([127, 0, 0, 1], 40_000 + i as u16));
            core.set_local_addr(addr);
            nodes.push(core);
            addrs.push(addr);
        }
        Self {
            nodes,
            addrs,
            in_flight: VecDeque::new(),
            events: vec![Vec::new(); n],
            drop_every: 0,
            delivered: 0,
        }
    }

    pub fn addr(&self, i: usize) -> SocketAddr {
        self.addrs[i]
    }

    /// Make `a` and `b` know each other.
    pub fn link(&mut self, a: usize, b: usize) {
        let to_b = self.addrs[b].to_string();
        let to_a = self.addrs[a].to_string();
        let out = self.nodes[a].add_peer(&to_b).unwrap();
        self.absorb(a, out);
        let out = self.nodes[b].add_peer(&to_a).unwrap();
        self.absorb(b, out);
    }

    pub fn line(n: usize) -> Self {
        let mut net = Self::new(n);
        for i in 1..n {
            net.link(i - 1, i);
        }
        net
    }

    /// Run `f` on node `i` and queue whatever it sends.
    pub fn act(&mut self, i: usize, f: impl FnOnce(&mut RumorCore) -> Vec<OutboundAction>) {
        let out = f(&mut self.nodes[i]);
        self.absorb(i, out);
    }

    pub fn absorb(&mut self, from: usize, actions: Vec<OutboundAction>) {
        for action in actions {
            match action {
                OutboundAction::SendDatagram(to, bytes) => self.in_flight.push_back((from, to, bytes)),
                other => self.events[from].push(other),
            }
        }
    }

    /// Deliver until no datagram is in flight.
    pub fn settle(&mut self) {
        while let Some((from, to, bytes)) = self.in_flight.pop_front() {
            self.delivered += 1;
            assert!(self.delivered < DELIVERY_CAP, "network did not settle");
            if self.drop_every != 0 && self.delivered % self.drop_every == 0 {
                continue;
            }
            let Some(dest) = self.addrs.iter().position(|a| *a == to) else {
                continue;
            };
            let src = self.addrs[from];
            let out = self.nodes[dest].on_datagram(src, &bytes).unwrap();
            self.absorb(dest, out);
        }
    }

    /// One tick on every node, then deliver everything.
    pub fn round(&mut self) {
        for i in 0..self.nodes.len() {
            let out = self.nodes[i].tick();
            self.absorb(i, out);
        }
        self.settle();
    }

    pub fn converged(&self) -> bool {
        let first = self.nodes[0].log().want_vector();
        self.nodes.iter().all(|n| n.log().want_vector() == first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FileRecord;

    fn file(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 253) as u8).collect()
    }

    #[test]
    fn chat_reaches_neighbor_with_direct_route() {
        let mut net = SimNet::new(2);
        net.link(0, 1);
        net.act(0, |c| c.send_chat("hello"));
        net.settle();
        let y = &net.nodes[1];
        assert_eq!(y.log().texts("N0"), vec!["hello"]);
        assert_eq!(y.directory().next_hop("N0"), Some(net.addr(0)));
        assert!(net.events[1].contains(&OutboundAction::ChatReceived {
            origin: "N0".into(),
            text: "hello".into()
        }));
    }

    #[test]
    fn line_of_five_converges() {
        let mut net = SimNet::line(5);
        for i in 0..5 {
            net.act(i, |c| c.originate_route_rumor());
            net.act(i, |c| c.send_chat(format!("hi from {i}")));
        }
        for _ in 0..200 {
            net.round();
            if net.converged() {
                break;
            }
        }
        assert!(net.converged());
        for node in &net.nodes {
            for i in 0..5 {
                assert_eq!(node.log().texts(&format!("N{i}")), vec![format!("hi from {i}")]);
            }
        }
        for (i, node) in net.nodes.iter().enumerate() {
            for j in (0..5).filter(|j| *j != i) {
                assert!(node.directory().next_hop(&format!("N{j}")).is_some());
            }
        }
    }

    #[test]
    fn anti_entropy_repairs_lossy_delivery() {
        let mut net = SimNet::line(3);
        net.drop_every = 3;
        for n in 0..6 {
            net.act(n % 3, |c| c.send_chat(format!("m{n}")));
        }
        net.settle();
        net.drop_every = 0;
        for _ in 0..100 {
            net.round();
            if net.converged() {
                break;
            }
        }
        assert!(net.converged());
        for node in &net.nodes {
            assert_eq!(node.log().texts("N0"), vec!["m0", "m3"]);
        }
    }

    #[test]
    fn ten_thousand_byte_file_transfers_over_a_relay() {
        let mut net = SimNet::line(3);
        let content = file(10_000);
        let record: FileRecord = net.nodes[2].share_file("/home/u/a.txt", &content).clone();
        assert_eq!(record.block_hashes.len(), 2);
        for i in 0..3 {
            net.act(i, |c| c.originate_route_rumor());
        }
        net.settle();

        net.act(0, |c| c.fetch("a.txt", "N2", record.top_hash));
        for _ in 0..10 {
            net.round();
        }
        let done: Vec<&OutboundAction> = net.events[0]
            .iter()
            .filter(|a| matches!(a, OutboundAction::TransferComplete { .. }))
            .collect();
        assert_eq!(
            done,
            vec![&OutboundAction::TransferComplete {
                filename: "a.txt".into(),
                data: content
            }]
        );
    }

    #[test]
    fn search_then_download() {
        let mut net = SimNet::line(3);
        let content = file(20_000);
        net.nodes[2].share_file("/pub/notes/a.txt", &content);
        net.nodes[1].share_file("/pub/b.txt", b"other");
        for i in 0..3 {
            net.act(i, |c| c.originate_route_rumor());
        }
        net.settle();

        net.nodes[0].start_search("a.txt");
        for _ in 0..3 {
            net.round();
        }
        assert!(net.events[0].contains(&OutboundAction::SearchMatch {
            filename: "a.txt".into(),
            origin: "N2".into()
        }));

        net.act(0, |c| c.start_download("a.txt").unwrap());
        for _ in 0..10 {
            net.round();
        }
        assert!(net.events[0].iter().any(
            |a| matches!(a, OutboundAction::TransferComplete { filename, data } if filename == "a.txt" && *data == content)
        ));
    }

    #[test]
    fn private_message_crosses_a_relay() {
        let mut net = SimNet::line(3);
        for i in 0..3 {
            net.act(i, |c| c.originate_route_rumor());
        }
        net.settle();
        net.act(0, |c| c.send_private("N2", "just for you"));
        net.settle();
        assert!(net.events[2].contains(&OutboundAction::PrivateReceived {
            origin: "N0".into(),
            text: "just for you".into()
        }));
        assert!(!net.events[1]
            .iter()
            .any(|a| matches!(a, OutboundAction::PrivateReceived { .. })));
    }
}

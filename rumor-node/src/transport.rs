//! UDP transport and the reactor that owns the core: one task, one socket.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rumor_core::chunk::bare_name;
use rumor_core::{OutboundAction, RumorCore};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::console::{self, UserAction};

/// Receive buffer; one datagram never exceeds this.
const RECV_BUF_LEN: usize = 65_536;

type HostLookup = (String, Result<Vec<IpAddr>, String>);

/// Bind the first free port among `candidates`. Exhausting them is fatal.
/// The socket is IPv4 only; the core refuses IPv6 peers once told our address.
pub async fn bind(candidates: &[u16]) -> anyhow::Result<(UdpSocket, u16)> {
    for &port in candidates {
        match UdpSocket::bind(("0.0.0.0", port)).await {
            Ok(socket) => return Ok((socket, port)),
            Err(e) => tracing::debug!(port, error = %e, "port unavailable"),
        }
    }
    anyhow::bail!("could not bind any UDP port in {candidates:?}")
}

struct Node {
    core: RumorCore,
    socket: Arc<UdpSocket>,
    download_dir: PathBuf,
    lookups: UnboundedSender<HostLookup>,
}

/// Run until `/quit`, console error or shutdown signal.
pub async fn run(
    core: RumorCore,
    socket: UdpSocket,
    port: u16,
    cfg: &Config,
    mut commands: UnboundedReceiver<UserAction>,
    shutdown: impl Future<Output = anyhow::Result<()>>,
) -> anyhow::Result<()> {
    let (lookups_tx, mut lookups_rx) = mpsc::unbounded_channel();
    let socket = Arc::new(socket);
    let mut node = Node {
        core,
        socket: socket.clone(),
        download_dir: cfg.download_dir.clone(),
        lookups: lookups_tx,
    };
    node.start(port, cfg).await;

    let period = Duration::from_millis(cfg.tick_ms.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);
    let mut buf = vec![0u8; RECV_BUF_LEN];
    let mut console_open = true;

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, from)) => {
                    match node.core.on_datagram(from, &buf[..n]) {
                        Ok(out) => node.perform(out).await,
                        Err(e) => tracing::debug!(%from, error = %e, "dropping datagram"),
                    }
                }
                // ICMP errors from earlier sends surface here on some platforms.
                Err(e) => tracing::debug!(error = %e, "recv failed"),
            },
            _ = ticker.tick() => {
                let out = node.core.tick();
                node.perform(out).await;
            }
            command = commands.recv(), if console_open => match command {
                Some(UserAction::Quit) => break,
                Some(action) => node.on_user_action(action).await,
                None => {
                    tracing::debug!("console closed");
                    console_open = false;
                }
            },
            Some((host, result)) = lookups_rx.recv() => {
                let out = node.core.on_host_resolved(&host, result);
                node.perform(out).await;
            }
            res = &mut shutdown => {
                res?;
                break;
            }
        }
    }
    tracing::info!("node stopped");
    Ok(())
}

impl Node {
    /// Register our address, sibling ports, configured peers and shares, then announce ourselves.
    async fn start(&mut self, port: u16, cfg: &Config) {
        self.core.set_local_addr(SocketAddr::from(([127, 0, 0, 1], port)));
        match local_ip_address::local_ip() {
            Ok(ip @ IpAddr::V4(_)) => self.core.add_local_alias(SocketAddr::new(ip, port)),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "no LAN address found"),
        }
        let mut initial: Vec<String> = cfg
            .sibling_ports(port)
            .into_iter()
            .map(|p| format!("127.0.0.1:{p}"))
            .collect();
        initial.extend(cfg.peers.iter().cloned());
        for spec in initial {
            self.add_peer(&spec).await;
        }
        for path in &cfg.share {
            self.share(path).await;
        }
        let out = self.core.originate_route_rumor();
        self.perform(out).await;
    }

    async fn add_peer(&mut self, spec: &str) {
        match self.core.add_peer(spec) {
            Ok(out) => self.perform(out).await,
            Err(e) => console::notice(format_args!("cannot add peer {spec}: {e}")),
        }
    }

    async fn share(&mut self, path: &Path) {
        match tokio::fs::read(path).await {
            Ok(content) => {
                let record = self.core.share_file(&path.to_string_lossy(), &content);
                console::notice(format_args!(
                    "sharing {} ({} bytes, {} blocks)",
                    record.name(),
                    record.size,
                    record.block_hashes.len()
                ));
            }
            Err(e) => console::notice(format_args!("cannot share {}: {e}", path.display())),
        }
    }

    async fn on_user_action(&mut self, action: UserAction) {
        let out = match action {
            UserAction::Chat(text) => self.core.send_chat(text),
            UserAction::Private { dest, text } => {
                if self.core.directory().next_hop(&dest).is_none() {
                    console::notice(format_args!("no route to {dest}"));
                }
                self.core.send_private(&dest, text)
            }
            UserAction::Search(query) => {
                self.core.start_search(query);
                Vec::new()
            }
            UserAction::AddPeer(spec) => {
                self.add_peer(&spec).await;
                Vec::new()
            }
            UserAction::Download(filename) => match self.core.start_download(&filename) {
                Ok(out) => out,
                Err(e) => {
                    console::notice(e);
                    Vec::new()
                }
            },
            UserAction::Share(path) => {
                self.share(&path).await;
                Vec::new()
            }
            UserAction::Origins => {
                let mut origins: Vec<&str> = self.core.directory().origins().collect();
                origins.sort_unstable();
                console::notice(format_args!("known origins: {}", origins.join(", ")));
                Vec::new()
            }
            UserAction::Quit => Vec::new(),
        };
        self.perform(out).await;
    }

    async fn perform(&mut self, actions: Vec<OutboundAction>) {
        for action in actions {
            match action {
                OutboundAction::SendDatagram(to, bytes) => {
                    if let Err(e) = self.socket.send_to(&bytes, to).await {
                        tracing::debug!(%to, error = %e, "send failed");
                    }
                }
                OutboundAction::ResolveHost { host, port } => self.spawn_lookup(host, port),
                OutboundAction::TransferComplete { filename, data } => {
                    match save(&self.download_dir, &filename, &data).await {
                        Ok(path) => console::notice(format_args!(
                            "downloaded {filename} ({} bytes) to {}",
                            data.len(),
                            path.display()
                        )),
                        Err(e) => tracing::warn!(%filename, error = %format!("{e:#}"), "could not save download"),
                    }
                }
                other => console::show(&other),
            }
        }
    }

    fn spawn_lookup(&self, host: String, port: u16) {
        let tx = self.lookups.clone();
        tokio::spawn(async move {
            let result = tokio::net::lookup_host((host.as_str(), port))
                .await
                .map(|addrs| addrs.map(|a| a.ip()).collect::<Vec<_>>())
                .map_err(|e| e.to_string());
            let _ = tx.send((host, result));
        });
    }
}

/// Write a completed download under `dir`, keeping only the final path component.
async fn save(dir: &Path, filename: &str, data: &[u8]) -> anyhow::Result<PathBuf> {
    let name = bare_name(filename);
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        anyhow::bail!("refusing to save under name {filename:?}");
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(name);
    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

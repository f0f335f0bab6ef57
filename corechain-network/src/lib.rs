//! Peer sync (spec.md §4.7): a periodic, per-peer HTTP poll exchanging
//! `(length, diffLength, tipHash)` and pulling block ranges into the chain
//! engine. This replaces the teacher's `libp2p` gossipsub swarm — see
//! DESIGN.md for why a push/gossip pubsub model doesn't fit an explicit
//! pull-based decision table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use corechain_core::wire::{PeerMessage, TipInfo};
use corechain_core::{Block, Transaction};
use rand::Rng;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub peers: Vec<String>,
    pub poll_interval_ms: u64,
    pub peer_jitter_ms: u64,
    /// `K`: the fixed reorg depth cap (spec.md §4.7).
    pub reorg_depth_cap: u64,
    pub range_cap: u64,
    pub backoff_initial_secs: u64,
    pub backoff_cap_secs: u64,
    pub request_timeout_ms: u64,
}

/// Identifies the peer a `SubmitBlocks`/`SubmitTx` message came from, so the
/// chain engine can report back success/failure for scoring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerSource(pub String);

/// The seam between peer sync and the chain engine. `corechain-node`'s
/// engine handle implements this; keeping it here (rather than depending on
/// `corechain-node`) avoids a crate cycle, mirroring `corechain-rpc`'s
/// `EngineApi` trait.
pub trait ChainSink: Send + Sync {
    fn local_tip(&self) -> TipInfo;
    fn submit_blocks(&self, blocks: Vec<Block>, source: PeerSource);
    fn submit_tx(&self, tx: Transaction);
    fn blocks_range(&self, from: u64, to: u64) -> Vec<Block>;
    /// Records the best height any peer has reported so far (spec.md §6:
    /// `known_length`), independent of whether a block range was fetched.
    fn report_known_length(&self, length: u64);
}

struct PeerState {
    backoff_until: Option<Instant>,
    backoff_secs: u64,
}

/// Tracks per-peer back-off after a bad delivery (spec.md §4.7: "Peer
/// scoring"). Shared between `PeerSync` (which polls) and the chain engine
/// (which reports verdicts once a delivered range has actually been
/// applied/rejected).
pub struct PeerBook {
    cfg: PeerConfig,
    peers: Mutex<HashMap<String, PeerState>>,
}

impl PeerBook {
    pub fn new(cfg: PeerConfig) -> Arc<Self> {
        let mut peers = HashMap::new();
        for url in &cfg.peers {
            peers.insert(
                url.clone(),
                PeerState {
                    backoff_until: None,
                    backoff_secs: cfg.backoff_initial_secs,
                },
            );
        }
        Arc::new(Self {
            cfg,
            peers: Mutex::new(peers),
        })
    }

    fn due_peers(&self) -> Vec<String> {
        let now = Instant::now();
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.backoff_until.map(|t| now >= t).unwrap_or(true))
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Blacklist a peer for its current back-off interval, then double it
    /// (capped) for next time — spec.md §4.7: "exponential up to a cap".
    pub fn record_failure(&self, url: &str) {
        let mut peers = self.peers.lock().unwrap();
        let entry = peers.entry(url.to_string()).or_insert(PeerState {
            backoff_until: None,
            backoff_secs: self.cfg.backoff_initial_secs,
        });
        entry.backoff_until = Some(Instant::now() + Duration::from_secs(entry.backoff_secs));
        entry.backoff_secs = (entry.backoff_secs * 2).min(self.cfg.backoff_cap_secs);
        warn!(peer = url, backoff_secs = entry.backoff_secs, "peer blacklisted");
    }

    pub fn record_success(&self, url: &str) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(entry) = peers.get_mut(url) {
            entry.backoff_until = None;
            entry.backoff_secs = self.cfg.backoff_initial_secs;
        }
    }
}

pub struct PeerSync<S: ChainSink> {
    cfg: PeerConfig,
    book: Arc<PeerBook>,
    sink: Arc<S>,
    client: reqwest::Client,
    node_id: String,
}

impl<S: ChainSink + 'static> PeerSync<S> {
    pub fn new(cfg: PeerConfig, book: Arc<PeerBook>, sink: Arc<S>, node_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        Ok(Self {
            cfg,
            book,
            sink,
            client,
            node_id,
        })
    }

    pub fn book(&self) -> Arc<PeerBook> {
        self.book.clone()
    }

    /// Runs until `stop` is set. One tick visits every peer not currently
    /// backed off, each separated by at least `peer_jitter_ms` (spec.md
    /// §4.7: "per-peer jitter ≥ 500 ms").
    pub async fn run(self, mut stop: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                return;
            }
            for url in self.book.due_peers() {
                if *stop.borrow() {
                    return;
                }
                match self.poll_peer(&url).await {
                    Ok(()) => self.book.record_success(&url),
                    Err(e) => {
                        debug!(peer = url, error = %e, "peer poll failed");
                        self.book.record_failure(&url);
                    }
                }
                let jitter = rand::thread_rng().gen_range(self.cfg.peer_jitter_ms..=self.cfg.peer_jitter_ms * 2);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(jitter)) => {}
                    _ = stop.changed() => return,
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.cfg.poll_interval_ms)) => {}
                _ = stop.changed() => return,
            }
        }
    }

    async fn exchange(&self, peer_url: &str, msg: &PeerMessage) -> Result<PeerMessage> {
        let url = format!("{}/peer", peer_url.trim_end_matches('/'));
        let resp = self.client.post(&url).json(msg).send().await?;
        Ok(resp.json::<PeerMessage>().await?)
    }

    /// One round of spec.md §4.7's decision table against a single peer.
    async fn poll_peer(&self, peer_url: &str) -> Result<()> {
        let local = self.sink.local_tip();
        let reply = self
            .exchange(
                peer_url,
                &PeerMessage::Tip(TipInfo {
                    node_id: self.node_id.clone(),
                    ..local.clone()
                }),
            )
            .await?;
        let peer_tip = match reply {
            PeerMessage::Tip(t) => t,
            other => return Err(anyhow!("unexpected reply to tip exchange: {other:?}")),
        };
        self.sink.report_known_length(peer_tip.length);

        if peer_tip.diff_length <= local.diff_length {
            // "push tx pool diff; nothing else" — mempool sync is a nice-to-have
            // the spec leaves unspecified in detail; nothing required here.
            return Ok(());
        }

        let wants_range = peer_tip.length > local.length || peer_tip.tip_hash != local.tip_hash;
        if !wants_range {
            return Ok(());
        }

        let from = local.length.saturating_sub(self.cfg.reorg_depth_cap);
        let to = (from + self.cfg.range_cap).min(peer_tip.length);
        if to < from {
            return Ok(());
        }

        let reply = self
            .exchange(peer_url, &PeerMessage::GetBlocks { from, to })
            .await?;
        let blocks = match reply {
            PeerMessage::Blocks { blocks } => blocks,
            other => return Err(anyhow!("unexpected reply to get_blocks: {other:?}")),
        };

        if blocks.len() as u64 > self.cfg.range_cap + 1 {
            return Err(anyhow!("peer sent an oversized block range"));
        }
        if let Some(first) = blocks.first() {
            if local.length.saturating_sub(first.length()) > self.cfg.reorg_depth_cap {
                return Err(anyhow!("peer range implies a reorg deeper than the cap"));
            }
        }

        info!(peer = peer_url, count = blocks.len(), from, to, "received block range");
        self.sink
            .submit_blocks(blocks, PeerSource(peer_url.to_string()));
        Ok(())
    }
}

/// Server-side handling of an incoming `PeerMessage` (spec.md §6's "Wire
/// format between peers"), used by `corechain-rpc`'s `/peer` route. Kept
/// here so both the outbound client (`PeerSync`) and the inbound handler
/// agree on the same message shapes.
pub fn handle_peer_message(sink: &dyn ChainSink, msg: PeerMessage, source: &str) -> PeerMessage {
    match msg {
        PeerMessage::Greet { node_id } => PeerMessage::Greet { node_id },
        PeerMessage::Tip(_) => PeerMessage::Tip(sink.local_tip()),
        PeerMessage::GetBlocks { from, to } => PeerMessage::Blocks {
            blocks: sink.blocks_range(from, to),
        },
        PeerMessage::Blocks { blocks } => {
            sink.submit_blocks(blocks, PeerSource(source.to_string()));
            PeerMessage::Tip(sink.local_tip())
        }
        PeerMessage::Tx { tx } => {
            sink.submit_tx(tx);
            PeerMessage::Tip(sink.local_tip())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corechain_core::BlockHash;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeSink {
        length: AtomicU64,
    }
    impl ChainSink for FakeSink {
        fn local_tip(&self) -> TipInfo {
            TipInfo {
                length: self.length.load(Ordering::SeqCst),
                diff_length: 0,
                tip_hash: BlockHash::default(),
                node_id: "fake".into(),
            }
        }
        fn submit_blocks(&self, _blocks: Vec<Block>, _source: PeerSource) {}
        fn submit_tx(&self, _tx: Transaction) {}
        fn blocks_range(&self, _from: u64, _to: u64) -> Vec<Block> {
            vec![]
        }
        fn report_known_length(&self, _length: u64) {}
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let cfg = PeerConfig {
            peers: vec!["http://peer".into()],
            poll_interval_ms: 1000,
            peer_jitter_ms: 10,
            reorg_depth_cap: 100,
            range_cap: 50,
            backoff_initial_secs: 10,
            backoff_cap_secs: 40,
            request_timeout_ms: 1000,
        };
        let book = PeerBook::new(cfg);
        assert_eq!(book.due_peers(), vec!["http://peer".to_string()]);
        book.record_failure("http://peer");
        assert!(book.due_peers().is_empty());
        {
            let mut peers = book.peers.lock().unwrap();
            peers.get_mut("http://peer").unwrap().backoff_secs = 40;
        }
        book.record_failure("http://peer");
        let peers = book.peers.lock().unwrap();
        assert_eq!(peers.get("http://peer").unwrap().backoff_secs, 40);
    }

    #[test]
    fn handle_get_blocks_delegates_to_sink() {
        let sink = FakeSink {
            length: AtomicU64::new(5),
        };
        let reply = handle_peer_message(&sink, PeerMessage::GetBlocks { from: 0, to: 5 }, "peer");
        assert!(matches!(reply, PeerMessage::Blocks { blocks } if blocks.is_empty()));
    }
}

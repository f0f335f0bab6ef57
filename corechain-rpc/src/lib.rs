//! The HTTP/JSON query surface (spec.md §6). Read-through to the chain
//! engine via the `EngineApi` trait — the seam that lets this crate depend
//! only on `corechain-core`/`corechain-network`/`corechain-wallet`, never on
//! `corechain-node`, so `corechain-node` can depend on `corechain-rpc` to
//! start the server without a crate cycle.
//!
//! Handlers that return chain-derived data reject requests while the engine
//! reports itself syncing (spec.md §6/§7/§8 scenario 5) with an advisory
//! body instead of partial data.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use corechain_core::wire::PeerMessage;
use corechain_core::{Account, Address, Block, History, Target, Transaction};
use corechain_network::{ChainSink, PeerSource};
use corechain_wallet::WalletStore;
use serde::{Deserialize, Serialize};
use tracing::info;

/// The read/write surface the chain engine exposes to the RPC layer.
/// `corechain-node`'s `EngineHandle` is the only implementor.
pub trait EngineApi: ChainSink + Send + Sync {
    fn node_id(&self) -> &str;
    fn length(&self) -> u64;
    fn known_length(&self) -> u64;
    fn is_syncing(&self) -> bool;
    fn balance(&self, addr: &Address) -> u64;
    fn account(&self, addr: &Address) -> Account;
    fn history(&self, addr: &Address) -> History;
    fn difficulty(&self) -> Target;
    fn diff_length(&self) -> i128;
    fn mempool_snapshot(&self) -> Vec<Transaction>;
    fn peers(&self) -> Vec<String>;
    fn block_at(&self, height: u64) -> Option<Block>;
    fn set_mining(&self, on: bool);
    fn mining_enabled(&self) -> bool;
    fn shutdown(&self);
}

const MAX_BLOCK_RANGE: u64 = 50;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn EngineApi>,
    pub wallets: Arc<WalletStore>,
}

/// Starts the REST server. Returns once the engine's stop signal fires or
/// the listener itself errors (spec.md §5: "The KV façade flushes and
/// closes last" — this task is expected to be the last one joined by
/// `corechain-node::run_node`).
pub async fn start_server(
    bind_addr: &str,
    engine: Arc<dyn EngineApi>,
    wallets: Arc<WalletStore>,
    mut stop: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr.parse()?;
    let state = AppState { engine, wallets };
    let app = router(state);
    info!("RPC listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        })
        .await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/blockcount", get(blockcount))
        .route("/block", get(block))
        .route("/balance", get(balance))
        .route("/history", get(history))
        .route("/difficulty", get(difficulty))
        .route("/txs", get(txs))
        .route("/send", post(send))
        .route("/peers", get(peers))
        .route("/node_id", get(node_id))
        .route("/start_miner", get(start_miner))
        .route("/stop_miner", get(stop_miner))
        .route("/stop", get(stop))
        .route("/peer", post(peer))
        .with_state(state)
}

/// The structured "reject" surface of spec.md §7: a short phrase plus a
/// stable kind tag, never an internal reason verbatim.
struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message, "kind": self.kind })),
        )
            .into_response()
    }
}

fn bad_request(kind: &'static str, message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        kind,
        message: message.into(),
    }
}

fn parse_address(s: &str) -> Result<Address, ApiError> {
    corechain_crypto::address_from_string(s).map_err(|_| bad_request("malformed", "bad address"))
}

/// Sync-in-progress advisory (spec.md §6/§7, §8 scenario 5): carries
/// `(length, known_length)` rather than partial chain-derived data.
#[derive(Serialize)]
struct SyncingAdvisory {
    syncing: String,
    length: u64,
    known_length: u64,
}

fn syncing_gate(state: &AppState) -> Option<Response> {
    if state.engine.is_syncing() {
        let length = state.engine.length();
        let known_length = state.engine.known_length();
        Some(
            Json(SyncingAdvisory {
                syncing: format!("{length}-{known_length}"),
                length,
                known_length,
            })
            .into_response(),
        )
    } else {
        None
    }
}

#[derive(Serialize)]
struct BlockCountResponse {
    length: u64,
    known_length: u64,
}

async fn blockcount(State(state): State<AppState>) -> impl IntoResponse {
    Json(BlockCountResponse {
        length: state.engine.length(),
        known_length: state.engine.known_length(),
    })
}

#[derive(Deserialize)]
struct BlockQuery {
    number: String,
}

async fn block(State(state): State<AppState>, Query(q): Query<BlockQuery>) -> Response {
    if let Some(resp) = syncing_gate(&state) {
        return resp;
    }
    let (from, to) = match q.number.split_once('-') {
        Some((a, b)) => {
            let Ok(a) = a.parse::<u64>() else {
                return bad_request("malformed", "bad range start").into_response();
            };
            let Ok(b) = b.parse::<u64>() else {
                return bad_request("malformed", "bad range end").into_response();
            };
            (a, b)
        }
        None => {
            let Ok(h) = q.number.parse::<u64>() else {
                return bad_request("malformed", "bad block number").into_response();
            };
            (h, h)
        }
    };
    if to < from {
        return bad_request("malformed", "range end before start").into_response();
    }
    let to = to.min(from + MAX_BLOCK_RANGE - 1);
    let blocks: Vec<Block> = (from..=to).filter_map(|h| state.engine.block_at(h)).collect();
    Json(serde_json::json!({ "blocks": blocks })).into_response()
}

#[derive(Deserialize)]
struct AddressQuery {
    address: String,
}

async fn balance(State(state): State<AppState>, Query(q): Query<AddressQuery>) -> Response {
    if let Some(resp) = syncing_gate(&state) {
        return resp;
    }
    let addr = match parse_address(&q.address) {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    Json(state.engine.balance(&addr)).into_response()
}

async fn history(State(state): State<AppState>, Query(q): Query<AddressQuery>) -> Response {
    if let Some(resp) = syncing_gate(&state) {
        return resp;
    }
    let addr = match parse_address(&q.address) {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    Json(state.engine.history(&addr)).into_response()
}

async fn difficulty(State(state): State<AppState>) -> Response {
    if let Some(resp) = syncing_gate(&state) {
        return resp;
    }
    let target = state.engine.difficulty();
    Json(serde_json::json!({ "target": hex::encode(target) })).into_response()
}

async fn txs(State(state): State<AppState>) -> Response {
    if let Some(resp) = syncing_gate(&state) {
        return resp;
    }
    Json(state.engine.mempool_snapshot()).into_response()
}

#[derive(Deserialize)]
struct SendRequest {
    amount: u64,
    to: String,
    #[serde(default)]
    message: String,
    wallet: String,
    /// Not named in spec.md §6's literal field list, but required to unlock
    /// the wallet file's encrypted secret key (spec.md §1: "a wallet file
    /// encryption tool" collaborator) before signing.
    password: String,
}

async fn send(State(state): State<AppState>, Json(req): Json<SendRequest>) -> Response {
    let to = match parse_address(&req.to) {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    let wallet = match state.wallets.load(&req.wallet) {
        Ok(w) => w,
        Err(_) => return bad_request("malformed", "unknown wallet").into_response(),
    };
    let secret = match state.wallets.unlock_secret(&wallet, &req.password) {
        Ok(s) => s,
        Err(_) => return bad_request("bad_signature", "wrong password").into_response(),
    };
    let sender_account = state.engine.account(&wallet.address);
    let tx = match corechain_wallet::sign_spend(
        &secret,
        &wallet.public_key,
        sender_account.count,
        req.amount,
        to,
        req.message.into_bytes(),
    ) {
        Ok(tx) => tx,
        Err(_) => return bad_request("malformed", "failed to build transaction").into_response(),
    };
    let txid = corechain_core::codec::txid(&tx);
    state.engine.submit_tx(tx);
    Json(serde_json::json!({ "txid": hex::encode(txid) })).into_response()
}

async fn peers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.peers())
}

async fn node_id(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "node_id": state.engine.node_id() }))
}

async fn start_miner(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.set_mining(true);
    Json(serde_json::json!({ "mining": true }))
}

async fn stop_miner(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.set_mining(false);
    Json(serde_json::json!({ "mining": false }))
}

async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.shutdown();
    Json(serde_json::json!({ "stopping": true }))
}

/// Server side of the peer wire protocol (spec.md §6: "Wire format between
/// peers"); `corechain-network::PeerSync` is the client side that POSTs
/// here on every other node it polls. Mirrors
/// `corechain_network::handle_peer_message`'s match arms directly against
/// `state.engine`'s `ChainSink` methods rather than reaching for that
/// function, since calling it would require upcasting `&dyn EngineApi` to
/// `&dyn ChainSink`.
async fn peer(State(state): State<AppState>, Json(msg): Json<PeerMessage>) -> impl IntoResponse {
    let source = state.engine.node_id().to_string();
    let reply = match msg {
        PeerMessage::Greet { node_id } => PeerMessage::Greet { node_id },
        PeerMessage::Tip(_) => PeerMessage::Tip(state.engine.local_tip()),
        PeerMessage::GetBlocks { from, to } => PeerMessage::Blocks {
            blocks: state.engine.blocks_range(from, to),
        },
        PeerMessage::Blocks { blocks } => {
            state.engine.submit_blocks(blocks, PeerSource(source));
            PeerMessage::Tip(state.engine.local_tip())
        }
        PeerMessage::Tx { tx } => {
            state.engine.submit_tx(tx);
            PeerMessage::Tip(state.engine.local_tip())
        }
    };
    Json(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tower::ServiceExt;

    struct FakeEngine {
        length: AtomicU64,
        known_length: AtomicU64,
    }

    impl ChainSink for FakeEngine {
        fn local_tip(&self) -> corechain_core::wire::TipInfo {
            corechain_core::wire::TipInfo {
                length: self.length.load(Ordering::SeqCst),
                diff_length: 0,
                tip_hash: corechain_core::ZERO_HASH,
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

    impl EngineApi for FakeEngine {
        fn node_id(&self) -> &str {
            "fake"
        }
        fn length(&self) -> u64 {
            self.length.load(Ordering::SeqCst)
        }
        fn known_length(&self) -> u64 {
            self.known_length.load(Ordering::SeqCst)
        }
        fn is_syncing(&self) -> bool {
            self.known_length() > self.length() + 2
        }
        fn balance(&self, _addr: &Address) -> u64 {
            42
        }
        fn account(&self, _addr: &Address) -> Account {
            Account::default()
        }
        fn history(&self, _addr: &Address) -> History {
            History::default()
        }
        fn difficulty(&self) -> Target {
            corechain_consensus::max_target()
        }
        fn diff_length(&self) -> i128 {
            0
        }
        fn mempool_snapshot(&self) -> Vec<Transaction> {
            vec![]
        }
        fn peers(&self) -> Vec<String> {
            vec![]
        }
        fn block_at(&self, _height: u64) -> Option<Block> {
            None
        }
        fn set_mining(&self, _on: bool) {}
        fn mining_enabled(&self) -> bool {
            false
        }
        fn shutdown(&self) {}
    }

    fn test_state(length: u64, known_length: u64) -> AppState {
        AppState {
            engine: Arc::new(FakeEngine {
                length: AtomicU64::new(length),
                known_length: AtomicU64::new(known_length),
            }),
            wallets: Arc::new(
                WalletStore::new(std::env::temp_dir().join(format!(
                    "corechain-rpc-test-{}",
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap()
                        .as_nanos()
                )))
                .unwrap(),
            ),
        }
    }

    #[tokio::test]
    async fn balance_returns_value_when_synced() {
        let app = router(test_state(10, 10));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/balance?address={}", corechain_crypto::address_to_string(&[1u8; 32])))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"42");
    }

    #[tokio::test]
    async fn balance_returns_advisory_while_syncing() {
        let app = router(test_state(10, 100));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/balance?address={}", corechain_crypto::address_to_string(&[1u8; 32])))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["syncing"], "10-100");
    }

    #[tokio::test]
    async fn blockcount_reports_length_and_known_length() {
        let app = router(test_state(3, 3));
        let resp = app
            .oneshot(Request::builder().uri("/blockcount").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["length"], 3);
        assert_eq!(v["known_length"], 3);
    }
}

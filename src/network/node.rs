//! The P2P node: connection lifecycle, peer registry, message dispatch, and
//! the reconnect/resync recovery paths.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};

use crate::blockchain::Chain;
use crate::transaction::pool::Mempool;
use crate::transaction::Transaction;
use crate::wallet::Wallet;

use super::protocol::{Message, ProtocolError};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

const FULL_SYNC_RATE_LIMIT: Duration = Duration::from_secs(5);
const MAX_RECONNECT_FAILURES: u32 = 6;

/// Fired on sync-state transitions. Delivery is best-effort: a slow or
/// panicking observer never blocks the node's own message loop.
pub trait SyncObserver: Send + Sync {
    fn on_sync_change(&self, _syncing: bool) {}
    fn on_synced(&self) {}
}

struct PeerHandle {
    outbox: mpsc::UnboundedSender<WsMessage>,
}

pub struct Node {
    self_address: String,
    peers: RwLock<HashMap<String, PeerHandle>>,
    pub chain: Arc<ArcSwap<Chain>>,
    pub mempool: Arc<Mempool>,
    synced: AtomicBool,
    observers: RwLock<Vec<Arc<dyn SyncObserver>>>,
    last_full_sync_request: RwLock<Option<Instant>>,
}

impl Node {
    pub fn new(self_address: String, chain: Arc<ArcSwap<Chain>>, mempool: Arc<Mempool>) -> Arc<Node> {
        Arc::new(Node {
            self_address,
            peers: RwLock::new(HashMap::new()),
            chain,
            mempool,
            synced: AtomicBool::new(false),
            observers: RwLock::new(Vec::new()),
            last_full_sync_request: RwLock::new(None),
        })
    }

    pub fn add_observer(&self, observer: Arc<dyn SyncObserver>) {
        self.observers.write().push(observer);
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Relaxed)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    fn peer_addresses(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    fn register_peer(&self, address: String, outbox: mpsc::UnboundedSender<WsMessage>) {
        self.peers.write().insert(address, PeerHandle { outbox });
    }

    fn drop_peer(&self, address: &str) {
        self.peers.write().remove(address);
    }

    async fn send_to(&self, address: &str, message: &Message) {
        let outbox = self.peers.read().get(address).map(|p| p.outbox.clone());
        let Some(outbox) = outbox else { return };
        if let Ok(text) = message.to_text() {
            let _ = outbox.send(WsMessage::Text(text));
        }
    }

    /// Every pooled peer gets its own send; one dead socket only drops that
    /// peer, never the rest of the broadcast.
    pub async fn broadcast(&self, message: &Message) {
        let Ok(text) = message.to_text() else { return };
        let handles: Vec<(String, mpsc::UnboundedSender<WsMessage>)> = self
            .peers
            .read()
            .iter()
            .map(|(addr, handle)| (addr.clone(), handle.outbox.clone()))
            .collect();
        for (addr, outbox) in handles {
            if outbox.send(WsMessage::Text(text.clone())).is_err() {
                self.drop_peer(&addr);
            }
        }
    }

    fn mark_syncing(&self) {
        if !self.synced.swap(false, Ordering::Relaxed) {
            return;
        }
        for observer in self.observers.read().iter() {
            observer.on_sync_change(true);
        }
    }

    fn mark_synced(&self) {
        if self.synced.swap(true, Ordering::Relaxed) {
            return;
        }
        for observer in self.observers.read().iter() {
            observer.on_sync_change(false);
            observer.on_synced();
        }
    }

    /// Accept connections on `addr` until the listener itself fails.
    pub async fn listen(node: Arc<Node>, addr: SocketAddr) -> Result<(), NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::Transport(e.to_string()))?;
        info!("p2p listening on {addr}");

        loop {
            let (stream, remote) = listener
                .accept()
                .await
                .map_err(|e| NetworkError::Transport(e.to_string()))?;
            let node = Arc::clone(&node);
            tokio::spawn(async move {
                match accept_async(stream).await {
                    Ok(ws) => handle_connection(node, ws, None).await,
                    Err(e) => warn!("websocket handshake failed from {remote}: {e}"),
                }
            });
        }
    }

    /// Dial `address` in the background, backing off on repeated failure.
    pub fn connect(node: &Arc<Node>, address: String) {
        let node = Arc::clone(node);
        tokio::spawn(dial_with_backoff(node, address));
    }

    async fn handle_incoming_chain(&self, blocks: Vec<crate::blockchain::Block>, from: &str) {
        let mut candidate = (*self.chain.load_full()).clone();
        match candidate.replace_chain(blocks) {
            Ok(()) => {
                self.chain.store(Arc::new(candidate));
                self.mempool.clear_confirmed(&self.chain.load().blocks);
                self.mark_synced();
            }
            Err(e) => {
                debug!("rejected chain from {from}: {e}");
                self.mark_syncing();
                self.mempool_recover(&e.to_string()).await;
            }
        }
    }

    /// Best-effort recovery from a bad peer-supplied chain: drop the
    /// offending transaction from the mempool if its id can be picked out
    /// of the rejection reason, then request a fresh full sync.
    async fn mempool_recover(&self, reason: &str) {
        if let Some(id) = extract_tx_id(reason) {
            self.mempool.remove(&id);
        }
        self.request_full_sync_any().await;
    }

    fn handle_incoming_transaction(&self, tx: Transaction) {
        if self.mempool.contains(&tx.id) {
            return;
        }
        let balance = Wallet::calculate_balance(&self.chain.load().blocks, tx.input.address());
        if let Err(e) = self.mempool.set(tx.clone(), balance) {
            debug!("rejected transaction {}: {e}", tx.id);
        }
    }

    /// Rate-limited (at most once per `FULL_SYNC_RATE_LIMIT`) request to a
    /// random peer for everything past our current height.
    pub async fn request_full_sync_any(&self) {
        {
            let mut last = self.last_full_sync_request.write();
            let now = Instant::now();
            if let Some(t) = *last {
                if now.duration_since(t) < FULL_SYNC_RATE_LIMIT {
                    return;
                }
            }
            *last = Some(now);
        }

        let addresses = self.peer_addresses();
        let Some(address) = addresses.choose(&mut rand::thread_rng()) else {
            return;
        };
        let start = self.chain.load().blocks.len() as u64;
        self.send_to(address, &Message::RequestChain { start }).await;
    }
}

async fn dispatch(node: &Arc<Node>, message: Message, from: &str) {
    match message {
        Message::Hello { .. } => {
            node.send_to(from, &Message::Peers { addresses: node.peer_addresses() })
                .await;
        }
        Message::Peers { addresses } => {
            for address in addresses {
                if address != node.self_address && !node.peers.read().contains_key(&address) {
                    Node::connect(node, address);
                }
            }
        }
        Message::RequestChain { start } => {
            let chain = node.chain.load();
            let blocks = chain
                .blocks
                .get(start as usize..)
                .unwrap_or(&[])
                .to_vec();
            node.send_to(from, &Message::ChainSegment { blocks }).await;
        }
        Message::ChainSegment { blocks } => {
            node.handle_incoming_chain(blocks, from).await;
        }
        Message::Block { block } => {
            let mut candidate = node.chain.load().blocks.clone();
            candidate.push(block);
            node.handle_incoming_chain(candidate, from).await;
        }
        Message::Transaction { transaction } => {
            node.handle_incoming_transaction(transaction);
        }
        Message::Ping => {
            node.send_to(from, &Message::Pong).await;
        }
        Message::Pong => {}
    }
}

async fn handle_connection<S>(node: Arc<Node>, ws: WebSocketStream<S>, known_address: Option<String>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<WsMessage>();

    if let Ok(text) = Message::hello(node.self_address.clone()).to_text() {
        let _ = outbox_tx.send(WsMessage::Text(text));
    }

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut peer_address = known_address;
    if let Some(address) = &peer_address {
        node.register_peer(address.clone(), outbox_tx.clone());
    }

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                warn!("peer socket error: {e}");
                break;
            }
        };
        let text = match frame {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let message = match Message::from_text(&text) {
            Ok(m) => m,
            Err(e) => {
                debug!("malformed frame: {e}");
                continue;
            }
        };

        // The HELLO-advertised address is preferred over the raw socket
        // remote address for peer identity, since the remote's ephemeral
        // outbound port rarely matches the address it listens on itself.
        if let Message::Hello { address, .. } = &message {
            peer_address = Some(address.clone());
            node.register_peer(address.clone(), outbox_tx.clone());
        }

        let from = peer_address.clone().unwrap_or_else(|| "unknown".to_string());
        dispatch(&node, message, &from).await;
    }

    if let Some(address) = peer_address {
        node.drop_peer(&address);
    }
    writer.abort();
}

async fn dial_with_backoff(node: Arc<Node>, address: String) {
    let mut failures: u32 = 0;
    loop {
        if node.peers.read().contains_key(&address) {
            return;
        }
        let url = format!("ws://{address}");
        match connect_async(&url).await {
            Ok((ws, _response)) => {
                failures = 0;
                handle_connection(Arc::clone(&node), ws, Some(address.clone())).await;
            }
            Err(e) => {
                warn!("dial {address} failed: {e}");
                failures = (failures + 1).min(MAX_RECONNECT_FAILURES);
            }
        }

        let backoff = Duration::from_secs(2u64.pow(failures.min(5)).min(30));
        tokio::time::sleep(backoff).await;
    }
}

/// Scan for a whitespace/punctuation-delimited run of 8+ hex digits in a
/// rejection message — the shape a transaction id takes in our error text.
fn extract_tx_id(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_hexdigit())
        .find(|token| token.len() >= 8)
        .map(|token| token.to_string())
}

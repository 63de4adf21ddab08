//! The node: one replica of the store.
//!
//! A node owns a storage adapter, a network adapter and an identity. Local
//! writes are built, signed, verified and stored before they are broadcast;
//! inbound records are deduplicated, verified and conflict-resolved before
//! they touch storage.
//!
//! Internal state sits behind a short-lived mutex that is never held across
//! an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tessera_core::{
    crdt_log_key, crdt_log_prefix, frozen_key, Address, CrdtError, CrdtKind, DynCrdt,
    RecordBuilder, VerificationRecord, VerifyResult,
};
use tessera_identity::{AccountEnvelope, Identity, IdentityError};
use tessera_net::{
    limits, ConnectionId, Deduplicator, Inbound, MessageBody, Network, PeerDescriptor, PeerEvent,
    PeerId, WireMessage,
};
use tessera_store::Store;
use tokio::sync::{broadcast, mpsc, oneshot, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::NodeConfig;
use crate::conflict;
use crate::error::{NodeError, Result};
use crate::events::{self, ConflictReport, Notification};
use crate::verify::{RecordPolicy, Verifier};

/// A CRDT instance the node merges inbound change logs into.
pub type SharedCrdt = Arc<Mutex<dyn DynCrdt>>;

/// The signed-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub address: Address,
}

#[derive(Default)]
struct NodeState {
    /// key -> callers waiting on a network answer
    pending: HashMap<String, Vec<oneshot::Sender<VerificationRecord>>>,
    /// keys this node asked peers to keep it updated on
    subscriptions: HashSet<String>,
    /// key -> connections that asked this node for updates
    subscribers: HashMap<String, HashSet<ConnectionId>>,
    crdts: HashMap<String, SharedCrdt>,
    session: Option<Session>,
}

/// A replica.
pub struct Node<S, N, I> {
    store: S,
    network: N,
    identity: I,
    config: NodeConfig,
    verifier: Verifier,
    clock: Arc<dyn Clock>,
    dedup: Deduplicator,
    ready: OnceCell<std::result::Result<(), String>>,
    state: Mutex<NodeState>,
    events: broadcast::Sender<Notification>,
}

impl<S: Store, N: Network, I: Identity> Node<S, N, I> {
    /// Create a node on wall-clock time.
    pub fn new(store: S, network: N, identity: I, config: NodeConfig) -> Self {
        let verifier = Verifier::new(config.pow_difficulty, config.max_clock_skew_millis());
        Self {
            store,
            network,
            identity,
            dedup: Deduplicator::new(config.dedup.clone()),
            config,
            verifier,
            clock: Arc::new(SystemClock),
            ready: OnceCell::new(),
            state: Mutex::new(NodeState::default()),
            events: events::channel(),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Install an application acceptance rule.
    pub fn with_policy(mut self, policy: Arc<dyn RecordPolicy>) -> Self {
        self.verifier = self.verifier.with_policy(policy);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Subscribe to node events.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// The signed-in account, if any.
    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    /// Initialize identity and storage. Runs once; every caller sees the
    /// same outcome.
    pub async fn ready(&self) -> Result<()> {
        let outcome = self
            .ready
            .get_or_init(|| async {
                let identity = async { self.identity.init().await.map_err(|e| e.to_string()) };
                let store = async { self.store.init().await.map_err(|e| e.to_string()) };
                tokio::try_join!(identity, store).map(|_| ())
            })
            .await;
        outcome.clone().map_err(NodeError::NotReady)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Write `value` under `key` and broadcast it.
    pub async fn put(&self, key: &str, value: Value) -> Result<VerificationRecord> {
        self.ready().await?;
        let record = self.build_record(key, value, None)?;
        self.write_local(record).await
    }

    /// Read `key`, asking peers only when there is no local copy.
    pub async fn get(&self, key: &str) -> Result<Option<VerificationRecord>> {
        self.ready().await?;
        if let Some(record) = self.store.get(key).await? {
            return Ok(Some(record));
        }
        self.query(key, false).await
    }

    /// Read `key`, preferring a peer's answer over the local copy.
    pub async fn get_fresh(&self, key: &str) -> Result<Option<VerificationRecord>> {
        self.ready().await?;
        if let Some(record) = self.query(key, false).await? {
            return Ok(Some(record));
        }
        Ok(self.store.get(key).await?)
    }

    /// Ask peers to send the current and future records under `key`.
    pub async fn subscribe(&self, key: &str) -> Result<()> {
        self.ready().await?;
        self.lock().subscriptions.insert(key.to_string());
        self.broadcast(MessageBody::Subscribe { key: key.to_string() })
            .await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // CRDTs
    // ─────────────────────────────────────────────────────────────────────────

    /// Write the full change log of `crdt` under `key`.
    pub async fn put_crdt<C: DynCrdt + ?Sized>(&self, key: &str, crdt: &C) -> Result<VerificationRecord> {
        let kind = crdt.kind();
        let changes = crdt.changes_json()?;
        self.ready().await?;
        let record = self.build_record(key, changes, Some(kind))?;
        self.write_local(record).await
    }

    /// Write the change log of the instance registered under `key`.
    pub async fn publish_crdt(&self, key: &str) -> Result<VerificationRecord> {
        let crdt = self
            .registered(key)
            .ok_or_else(|| NodeError::NotRegistered(key.to_string()))?;
        let (kind, changes) = {
            let guard = lock_crdt(&crdt);
            (guard.kind(), guard.changes_json())
        };
        self.ready().await?;
        let record = self.build_record(key, changes?, Some(kind))?;
        self.write_local(record).await
    }

    /// Merge every writer's change log stored for `key` into `crdt`,
    /// asking peers when there is no local copy. Returns how many entries
    /// were new, or `None` when no record was found.
    pub async fn get_crdt<C: DynCrdt + ?Sized>(&self, key: &str, crdt: &mut C) -> Result<Option<usize>> {
        self.ready().await?;
        let mut logs = self.crdt_logs(key).await?;
        if logs.is_empty() {
            let record = match self.store.get(key).await? {
                Some(record) => Some(record),
                None => self.query(key, true).await?,
            };
            let Some(record) = record else {
                return Ok(None);
            };
            // Answers from other writers may have landed alongside this one.
            logs = self.crdt_logs(key).await?;
            if logs.is_empty() {
                logs.push(record);
            }
        }

        let mut merged = 0;
        for record in &logs {
            merged += merge_record(record, crdt)?;
        }
        Ok(Some(merged))
    }

    /// Merge future inbound change logs for `key` into `crdt`.
    pub fn register_crdt(&self, key: &str, crdt: SharedCrdt) {
        self.lock().crdts.insert(key.to_string(), crdt);
    }

    fn registered(&self, key: &str) -> Option<SharedCrdt> {
        self.lock().crdts.get(key).cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────────

    /// Claim `==username` for the current key, sealed under `password`.
    ///
    /// Only the local store is consulted; a concurrent claim elsewhere is
    /// settled later by first-writer order.
    pub async fn sign_up(&self, username: &str, password: &str) -> Result<Session> {
        self.ready().await?;
        let key = frozen_key(username);
        if let Some(existing) = self.store.get(&key).await? {
            return Err(NodeError::UserExists {
                username: username.to_string(),
                address: existing.address,
                timestamp: existing.timestamp,
            });
        }

        let envelope = self.identity.encrypt_account(password).await?;
        let record = self.build_record(&key, envelope.to_json(), None)?;
        let record = self.write_local(record).await?;

        info!(username, address = %record.address, "signed up");
        Ok(self.start_session(username, record.address))
    }

    /// Load `==username` and open it with `password`.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<Session> {
        let key = frozen_key(username);
        let record = self
            .get(&key)
            .await?
            .ok_or_else(|| NodeError::UserNotFound(username.to_string()))?;

        let envelope = AccountEnvelope::from_json(&record.value)?;
        if envelope.address != record.address {
            return Err(IdentityError::MalformedEnvelope(
                "account sealed under another address".into(),
            )
            .into());
        }

        let address = match self.identity.decrypt_account(&envelope, password).await {
            Ok(address) => address,
            Err(IdentityError::WrongPassword) => return Err(NodeError::WrongPassword),
            Err(e) => return Err(e.into()),
        };

        info!(username, %address, "signed in");
        Ok(self.start_session(username, address))
    }

    /// End the session and continue under a fresh anonymous key.
    pub fn sign_out(&self) -> Result<()> {
        let address = self.identity.sign_out()?;
        if let Some(session) = self.lock().session.take() {
            info!(username = %session.username, %address, "signed out");
        }
        Ok(())
    }

    fn start_session(&self, username: &str, address: Address) -> Session {
        let session = Session {
            username: username.to_string(),
            address,
        };
        self.lock().session = Some(session.clone());
        session
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle one raw frame received on `connection`.
    ///
    /// Problems with the frame or its record are reported through
    /// notifications; only local storage failures are errors.
    pub async fn on_client_message(&self, frame: &[u8], connection: ConnectionId) -> Result<()> {
        self.ready().await?;

        let message = match WireMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(%connection, error = %e, "undecodable frame");
                self.notify(Notification::Rejected {
                    key: None,
                    result: VerifyResult::InvalidData,
                    connection,
                });
                return Ok(());
            }
        };

        if self.dedup.check_and_mark(&message.id) {
            debug!(id = %message.id, kind = message.kind(), "duplicate message dropped");
            return Ok(());
        }

        match &message.body {
            MessageBody::Put { record } | MessageBody::CrdtPut { record } => {
                self.receive_record(record, &message, connection).await
            }
            MessageBody::Get { key } => self.answer_get(key, connection, false).await,
            MessageBody::CrdtGet { key } => self.answer_get(key, connection, true).await,
            MessageBody::Subscribe { key } => {
                self.lock()
                    .subscribers
                    .entry(key.clone())
                    .or_default()
                    .insert(connection);
                self.answer_get(key, connection, true).await
            }
            MessageBody::Ping { peer } => {
                let first = self.register_peer(connection, peer);
                self.send_to(
                    connection,
                    MessageBody::Pong {
                        peer: self.network.local_peer(),
                    },
                )
                .await;
                if first {
                    self.peer_announced(connection, peer.clone()).await;
                }
                Ok(())
            }
            MessageBody::Pong { peer } => {
                if self.register_peer(connection, peer) {
                    self.peer_announced(connection, peer.clone()).await;
                }
                Ok(())
            }
        }
    }

    /// Handle a connection opening or closing.
    pub async fn on_peer_event(&self, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::Connected(connection) => {
                debug!(%connection, "connection opened");
                self.send_to(
                    connection,
                    MessageBody::Ping {
                        peer: self.network.local_peer(),
                    },
                )
                .await;
            }
            PeerEvent::Disconnected(connection) => {
                {
                    let mut state = self.lock();
                    for subscribers in state.subscribers.values_mut() {
                        subscribers.remove(&connection);
                    }
                    state.subscribers.retain(|_, subscribers| !subscribers.is_empty());
                }
                debug!(%connection, "connection closed");
                self.notify(Notification::PeerDisconnected { connection });
            }
        }
        Ok(())
    }

    async fn receive_record(
        &self,
        record: &VerificationRecord,
        message: &WireMessage,
        connection: ConnectionId,
    ) -> Result<()> {
        let result = self
            .verifier
            .verify(&self.store, &self.identity, record, self.clock.now())
            .await?;
        if !result.is_verified() {
            warn!(key = %record.key, %result, %connection, "inbound record rejected");
            self.notify(Notification::Rejected {
                key: Some(record.key.clone()),
                result,
                connection,
            });
            return Ok(());
        }

        // Change logs merge and are kept per writer whether or not this
        // record wins the key.
        let mut log_stored = false;
        if record.crdt.is_some() {
            self.merge_registered(record);
            log_stored = self.store_crdt_log(record).await?;
        }

        let existing = self.store.get(&record.key).await?;
        let resolution = conflict::resolve(existing.as_ref(), record);
        if let Some(report) = resolution.conflict() {
            self.report_conflict(report);
        }

        if resolution.stores_incoming() {
            self.store.put(&record.key, record).await?;
            debug!(key = %record.key, address = %record.address, "stored inbound record");
            self.notify(Notification::RecordStored {
                key: record.key.clone(),
                address: record.address,
            });
        }
        if resolution.stores_incoming() || log_stored {
            self.relay(message, connection, &record.key).await;
        }

        self.answer_waiters(&record.key).await
    }

    fn report_conflict(&self, report: &ConflictReport) {
        info!(
            key = %report.key,
            winner = ?report.winner,
            winning_address = %report.winning_address(),
            "frozen key conflict resolved"
        );
        self.notify(Notification::ConflictResolved(report.clone()));

        if self.identity.address().ok() == Some(report.losing_address()) {
            warn!(key = %report.key, "own claim superseded by an earlier writer");
            self.notify(Notification::ClaimSuperseded {
                key: report.key.clone(),
                winner: report.winning_address(),
            });
        }
    }

    fn merge_registered(&self, record: &VerificationRecord) {
        let Some(crdt) = self.registered(&record.key) else {
            return;
        };
        let merged = {
            let mut guard = lock_crdt(&crdt);
            merge_record(record, &mut *guard)
        };
        match merged {
            Ok(0) => {}
            Ok(new_entries) => {
                debug!(key = %record.key, new_entries, "merged inbound changes");
                self.notify(Notification::CrdtMerged {
                    key: record.key.clone(),
                    new_entries,
                });
            }
            Err(e) => warn!(key = %record.key, error = %e, "could not merge inbound changes"),
        }
    }

    /// Send the record under `key`, followed by every other writer's
    /// change log when `with_logs` is set and the key holds a CRDT.
    async fn answer_get(&self, key: &str, connection: ConnectionId, with_logs: bool) -> Result<()> {
        let Some(record) = self.store.get(key).await? else {
            return Ok(());
        };
        let logs = if with_logs && record.crdt.is_some() {
            self.crdt_logs(key).await?
        } else {
            Vec::new()
        };

        let sent = record.hash;
        self.send_to(connection, record_body(record)).await;
        for log in logs.into_iter().filter(|log| log.hash != sent) {
            self.send_to(connection, record_body(log)).await;
        }
        Ok(())
    }

    /// Keep the newest change log from each writer. Returns `true` when
    /// `record` was stored.
    async fn store_crdt_log(&self, record: &VerificationRecord) -> Result<bool> {
        let slot = crdt_log_key(&record.key, &record.address);
        if let Some(stored) = self.store.get(&slot).await? {
            if !record.supersedes(&stored) {
                return Ok(false);
            }
        }
        self.store.put(&slot, record).await?;
        Ok(true)
    }

    /// Every writer's latest change log for `key`.
    async fn crdt_logs(&self, key: &str) -> Result<Vec<VerificationRecord>> {
        let mut logs = Vec::new();
        for slot in self.store.query(&crdt_log_prefix(key)).await? {
            if let Some(record) = self.store.get(&slot).await? {
                if record.key == key && record.crdt.is_some() {
                    logs.push(record);
                }
            }
        }
        Ok(logs)
    }

    /// Returns `true` the first time a connection is registered.
    fn register_peer(&self, connection: ConnectionId, peer: &PeerDescriptor) -> bool {
        let first = self.network.peer_of(connection).is_none();
        self.network.register_connection(connection, peer.clone());
        first
    }

    async fn peer_announced(&self, connection: ConnectionId, peer: PeerDescriptor) {
        debug!(%connection, peer = %peer.peer_id, kind = ?peer.kind, "peer announced");
        self.notify(Notification::PeerConnected { connection, peer });

        let keys: Vec<String> = self.lock().subscriptions.iter().cloned().collect();
        for key in keys {
            self.send_to(connection, MessageBody::Subscribe { key }).await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, notification: Notification) {
        // No receivers is not an error.
        let _ = self.events.send(notification);
    }

    fn build_record(
        &self,
        key: &str,
        value: Value,
        crdt: Option<CrdtKind>,
    ) -> Result<VerificationRecord> {
        let address = self.identity.address()?;
        let mut builder = RecordBuilder::new(key, value, address)
            .timestamp(self.clock.now())
            .difficulty(self.config.pow_difficulty);
        if let Some(kind) = crdt {
            builder = builder.crdt(kind);
        }
        let unsigned = builder.build();
        let signature = self.identity.sign_data(unsigned.hash())?;
        Ok(unsigned.with_signature(signature))
    }

    /// Verify, store and broadcast a record built by this node.
    async fn write_local(&self, record: VerificationRecord) -> Result<VerificationRecord> {
        let result = self
            .verifier
            .verify(&self.store, &self.identity, &record, self.clock.now())
            .await?;
        if !result.is_verified() {
            warn!(key = %record.key, %result, "local record rejected");
            return Err(NodeError::Rejected {
                key: record.key,
                result,
            });
        }

        self.store.put(&record.key, &record).await?;
        if record.crdt.is_some() {
            self.store_crdt_log(&record).await?;
        }
        self.notify(Notification::RecordStored {
            key: record.key.clone(),
            address: record.address,
        });
        self.answer_waiters(&record.key).await?;

        self.broadcast(record_body(record.clone())).await;
        Ok(record)
    }

    /// Ask peers for `key` and wait up to `get_timeout` for a verified
    /// answer. Answers arriving later are still stored.
    async fn query(&self, key: &str, crdt: bool) -> Result<Option<VerificationRecord>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            let waiters = state.pending.entry(key.to_string()).or_default();
            waiters.retain(|waiter| !waiter.is_closed());
            waiters.push(tx);
        }

        let body = if crdt {
            MessageBody::CrdtGet { key: key.to_string() }
        } else {
            MessageBody::Get { key: key.to_string() }
        };
        let message = self.outgoing(body);
        let sent = match self.network.send_to_all(&message, false).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(key, error = %e, "get broadcast failed");
                0
            }
        };

        let answer = if sent == 0 {
            drop(rx);
            None
        } else {
            match tokio::time::timeout(self.config.get_timeout, rx).await {
                Ok(Ok(record)) => Some(record),
                Ok(Err(_)) => None,
                Err(_) => {
                    debug!(key, timeout = ?self.config.get_timeout, "get timed out");
                    None
                }
            }
        };
        self.prune_waiters(key);
        Ok(answer)
    }

    fn prune_waiters(&self, key: &str) {
        let mut state = self.lock();
        if let Some(waiters) = state.pending.get_mut(key) {
            waiters.retain(|waiter| !waiter.is_closed());
            if waiters.is_empty() {
                state.pending.remove(key);
            }
        }
    }

    /// Hand the stored record for `key` to everyone waiting on it.
    async fn answer_waiters(&self, key: &str) -> Result<()> {
        let waiters = self.lock().pending.remove(key).unwrap_or_default();
        if waiters.is_empty() {
            return Ok(());
        }
        if let Some(record) = self.store.get(key).await? {
            for waiter in waiters {
                let _ = waiter.send(record.clone());
            }
        }
        Ok(())
    }

    /// Wrap `body` in a message this node will not process again.
    fn outgoing(&self, body: MessageBody) -> WireMessage {
        let message = WireMessage::new(body).seen_by(self.local_peer_id());
        self.dedup.check_and_mark(&message.id);
        message
    }

    fn local_peer_id(&self) -> PeerId {
        self.network.local_peer().peer_id
    }

    async fn broadcast(&self, body: MessageBody) {
        let message = self.outgoing(body);
        match self.network.send_to_all(&message, false).await {
            Ok(sent) => debug!(kind = message.kind(), sent, "broadcast"),
            Err(e) => warn!(kind = message.kind(), error = %e, "broadcast failed"),
        }
    }

    async fn send_to(&self, connection: ConnectionId, body: MessageBody) {
        let message = self.outgoing(body);
        if let Err(e) = self.network.send(connection, &message).await {
            warn!(%connection, kind = message.kind(), error = %e, "send failed");
        }
    }

    /// Forward an accepted record: to every peer that has not seen it when
    /// relaying, otherwise only to peers subscribed to its key.
    async fn relay(&self, message: &WireMessage, from: ConnectionId, key: &str) {
        let mut forwarded = mark_seen(message.clone(), self.local_peer_id());
        if let Some(peer) = self.network.peer_of(from) {
            forwarded = mark_seen(forwarded, peer.peer_id);
        }

        if self.config.relay {
            match self.network.send_to_all(&forwarded, false).await {
                Ok(0) => {}
                Ok(sent) => debug!(key, sent, "relayed"),
                Err(e) => warn!(key, error = %e, "relay failed"),
            }
            return;
        }

        let subscribers: Vec<ConnectionId> = self
            .lock()
            .subscribers
            .get(key)
            .map(|connections| connections.iter().copied().filter(|c| *c != from).collect())
            .unwrap_or_default();
        for connection in subscribers {
            if let Err(e) = self.network.send(connection, &forwarded).await {
                warn!(%connection, key, error = %e, "subscriber update failed");
            }
        }
    }
}

impl<S, N, I> Node<S, N, I>
where
    S: Store + 'static,
    N: Network + 'static,
    I: Identity + 'static,
{
    /// Drive the node from a transport's inbound channel until it closes.
    pub fn spawn_inbound_loop(self: &Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Inbound>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(inbound) = inbox.recv().await {
                let outcome = match inbound {
                    Inbound::Message { connection, frame } => {
                        node.on_client_message(&frame, connection).await
                    }
                    Inbound::Peer(event) => node.on_peer_event(event).await,
                };
                if let Err(e) = outcome {
                    warn!(error = %e, "inbound handling failed");
                }
            }
            debug!("inbound channel closed");
        })
    }
}

fn record_body(record: VerificationRecord) -> MessageBody {
    if record.crdt.is_some() {
        MessageBody::CrdtPut { record }
    } else {
        MessageBody::Put { record }
    }
}

fn mark_seen(message: WireMessage, peer: PeerId) -> WireMessage {
    if message.to.len() >= limits::MAX_SEEN_BY {
        return message;
    }
    message.seen_by(peer)
}

fn lock_crdt(crdt: &SharedCrdt) -> MutexGuard<'_, dyn DynCrdt + 'static> {
    crdt.lock().unwrap_or_else(|e| e.into_inner())
}

fn merge_record<C: DynCrdt + ?Sized>(
    record: &VerificationRecord,
    crdt: &mut C,
) -> std::result::Result<usize, CrdtError> {
    let expected = crdt.kind();
    match record.crdt {
        Some(got) if got == expected => crdt.merge_json(&record.value),
        Some(got) => Err(CrdtError::KindMismatch { expected, got }),
        None => Err(CrdtError::MalformedChanges(format!(
            "{} does not hold a change log",
            record.key
        ))),
    }
}

//! In-process message broker with AMQP-style semantics.
//!
//! [`InMemoryBroker`] plays the server: exchanges, queues with dead-letter
//! routing and message TTL, sessions, and per-delivery acknowledgement.
//! [`BrokerConnection`] is the client side. It owns one session, declares the
//! settlement topology, and transparently reopens the session when it finds it
//! closed.
//!
//! Delivery guarantees are at-least-once: deliveries that are not acknowledged
//! when their session closes go back to the head of their queue flagged as
//! redelivered.

use crate::config::QueueTopology;
use crate::domain::ports::{Acker, Delivery, MessageChannel};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Declaration arguments of a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueArgs {
    /// Queue (through the default exchange) receiving rejected or expired messages.
    pub dead_letter_routing_key: Option<String>,
    /// Time a message may wait in the queue before it is dead-lettered.
    pub message_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
struct Envelope {
    body: Vec<u8>,
    redelivered: bool,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct QueueState {
    args: QueueArgs,
    messages: VecDeque<Envelope>,
    /// Never later than the earliest expiry in `messages`. May be stale after a
    /// message leaves the queue; the next expiry pass recomputes it.
    earliest_expiry: Option<Instant>,
}

impl QueueState {
    fn new(args: QueueArgs) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    fn push_back(&mut self, envelope: Envelope) {
        self.track(&envelope);
        self.messages.push_back(envelope);
    }

    fn push_front(&mut self, envelope: Envelope) {
        self.track(&envelope);
        self.messages.push_front(envelope);
    }

    fn track(&mut self, envelope: &Envelope) {
        if let Some(at) = envelope.expires_at {
            self.earliest_expiry = Some(self.earliest_expiry.map_or(at, |e| e.min(at)));
        }
    }

    /// Removes the messages whose TTL has elapsed. A queue with nothing due is not scanned.
    fn expire(&mut self, now: Instant) -> Vec<Envelope> {
        if !self.earliest_expiry.is_some_and(|at| at <= now) {
            return Vec::new();
        }
        let (gone, kept): (Vec<_>, Vec<_>) = self
            .messages
            .drain(..)
            .partition(|e| e.expires_at.is_some_and(|at| at <= now));
        self.messages = VecDeque::from(kept);
        self.earliest_expiry = self.messages.iter().filter_map(|e| e.expires_at).min();
        gone
    }
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    session: u64,
    envelope: Envelope,
}

#[derive(Debug)]
struct BrokerState {
    available: bool,
    exchanges: HashSet<String>,
    bindings: HashMap<(String, String), String>,
    queues: HashMap<String, QueueState>,
    unacked: HashMap<u64, Unacked>,
    sessions: HashSet<u64>,
    next_session: u64,
    next_tag: u64,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            available: true,
            exchanges: HashSet::new(),
            bindings: HashMap::new(),
            queues: HashMap::new(),
            unacked: HashMap::new(),
            sessions: HashSet::new(),
            next_session: 1,
            next_tag: 1,
        }
    }
}

impl BrokerState {
    fn check_session(&self, session: u64) -> Result<()> {
        if self.sessions.contains(&session) {
            Ok(())
        } else {
            Err(LedgerError::Broker(format!("session {session} is closed")))
        }
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Option<String> {
        if exchange.is_empty() {
            return self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string());
        }
        self.bindings
            .get(&(exchange.to_string(), routing_key.to_string()))
            .cloned()
    }

    fn enqueue(&mut self, queue: &str, mut envelope: Envelope, now: Instant) -> bool {
        let Some(state) = self.queues.get_mut(queue) else {
            return false;
        };
        let queue_expiry = state.args.message_ttl.map(|ttl| now + ttl);
        envelope.expires_at = match (envelope.expires_at, queue_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        state.push_back(envelope);
        true
    }

    /// Routes a rejected or expired message to the queue's dead-letter target.
    fn dead_letter(&mut self, from: &str, mut envelope: Envelope, now: Instant) {
        let target = self
            .queues
            .get(from)
            .and_then(|q| q.args.dead_letter_routing_key.clone());
        envelope.expires_at = None;
        match target {
            Some(target) if self.enqueue(&target, envelope, now) => {
                debug!(from, target, "message dead-lettered");
            }
            _ => warn!(from, "message dropped: no dead-letter target"),
        }
    }

    /// Dead-letters every message whose TTL has elapsed.
    fn sweep(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            expired.extend(queue.expire(now).into_iter().map(|e| (name.clone(), e)));
        }
        for (queue, envelope) in expired {
            self.dead_letter(&queue, envelope, now);
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.queues.values().filter_map(|q| q.earliest_expiry).min()
    }

    fn requeue_session(&mut self, session: u64) {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.session == session)
            .map(|(tag, _)| *tag)
            .collect();
        // Highest tag first so that push_front restores the original order.
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(Unacked {
                queue,
                mut envelope,
                ..
            }) = self.unacked.remove(&tag)
            {
                envelope.redelivered = true;
                if let Some(q) = self.queues.get_mut(&queue) {
                    q.push_front(envelope);
                }
            }
        }
    }
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    changed: Notify,
}

/// The broker "server". Cloning shares the same queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                changed: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| LedgerError::Broker("broker state poisoned".to_string()))
    }

    fn notify(&self) {
        self.inner.changed.notify_waiters();
    }

    /// Simulates the broker going down (`false`) or coming back (`true`).
    ///
    /// Going down closes every session, which requeues unacknowledged deliveries.
    pub fn set_available(&self, available: bool) -> Result<()> {
        self.lock()?.available = available;
        if available {
            Ok(())
        } else {
            self.drop_connections()
        }
    }

    /// Closes every open session, as a dropped TCP connection would.
    pub fn drop_connections(&self) -> Result<()> {
        let mut state = self.lock()?;
        let sessions: Vec<u64> = state.sessions.drain().collect();
        for session in sessions {
            state.requeue_session(session);
        }
        drop(state);
        self.notify();
        Ok(())
    }

    pub fn open_session(&self) -> Result<u64> {
        let mut state = self.lock()?;
        if !state.available {
            return Err(LedgerError::Broker("connection refused".to_string()));
        }
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(id);
        Ok(id)
    }

    pub fn is_session_open(&self, session: u64) -> bool {
        self.lock()
            .map(|s| s.sessions.contains(&session))
            .unwrap_or(false)
    }

    pub fn close_session(&self, session: u64) -> Result<()> {
        let mut state = self.lock()?;
        if state.sessions.remove(&session) {
            state.requeue_session(session);
        }
        drop(state);
        self.notify();
        Ok(())
    }

    pub fn declare_exchange(&self, session: u64, name: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.check_session(session)?;
        state.exchanges.insert(name.to_string());
        Ok(())
    }

    /// Declares a queue. Redeclaring with different arguments is an error, as in AMQP.
    pub fn declare_queue(&self, session: u64, name: &str, args: QueueArgs) -> Result<()> {
        let mut state = self.lock()?;
        state.check_session(session)?;
        match state.queues.get(name) {
            Some(existing) if existing.args != args => Err(LedgerError::Broker(format!(
                "queue {name} already declared with different arguments"
            ))),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(name.to_string(), QueueState::new(args));
                Ok(())
            }
        }
    }

    pub fn bind_queue(&self, session: u64, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.check_session(session)?;
        if !state.exchanges.contains(exchange) {
            return Err(LedgerError::Broker(format!("exchange {exchange} not found")));
        }
        if !state.queues.contains_key(queue) {
            return Err(LedgerError::Broker(format!("queue {queue} not found")));
        }
        state
            .bindings
            .insert((exchange.to_string(), routing_key.to_string()), queue.to_string());
        Ok(())
    }

    pub fn publish(
        &self,
        session: u64,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        expiration: Option<Duration>,
    ) -> Result<()> {
        let now = Instant::now();
        let mut state = self.lock()?;
        state.check_session(session)?;
        let queue = state.route(exchange, routing_key).ok_or_else(|| {
            LedgerError::Broker(format!("unroutable message: {exchange}/{routing_key}"))
        })?;
        let envelope = Envelope {
            body,
            redelivered: false,
            expires_at: expiration.map(|ttl| now + ttl),
        };
        state.enqueue(&queue, envelope, now);
        drop(state);
        self.notify();
        Ok(())
    }

    /// Takes the head of `queue`, if any, as an unacknowledged delivery.
    fn take(&self, session: u64, queue: &str) -> Result<Option<(u64, Envelope)>> {
        let now = Instant::now();
        let mut state = self.lock()?;
        state.check_session(session)?;
        state.sweep(now);
        let Some(envelope) = state.queues.get_mut(queue).and_then(|q| q.messages.pop_front())
        else {
            return Ok(None);
        };
        let tag = state.next_tag;
        state.next_tag += 1;
        state.unacked.insert(
            tag,
            Unacked {
                queue: queue.to_string(),
                session,
                envelope: envelope.clone(),
            },
        );
        Ok(Some((tag, envelope)))
    }

    fn settle(&self, session: u64, tag: u64, requeue: Option<bool>) -> Result<()> {
        let now = Instant::now();
        let mut state = self.lock()?;
        state.check_session(session)?;
        let owned = state.unacked.get(&tag).is_some_and(|u| u.session == session);
        let unacked = owned
            .then(|| state.unacked.remove(&tag))
            .flatten()
            .ok_or_else(|| LedgerError::Broker(format!("unknown delivery tag {tag}")))?;

        match requeue {
            None => {}
            Some(true) => {
                let mut envelope = unacked.envelope;
                envelope.redelivered = true;
                if let Some(q) = state.queues.get_mut(&unacked.queue) {
                    q.push_front(envelope);
                }
            }
            Some(false) => state.dead_letter(&unacked.queue, unacked.envelope, now),
        }
        drop(state);
        self.notify();
        Ok(())
    }

    /// Number of ready messages in `queue`, after expiring what is due.
    pub fn message_count(&self, queue: &str) -> Result<usize> {
        let mut state = self.lock()?;
        state.sweep(Instant::now());
        Ok(state.queues.get(queue).map_or(0, |q| q.messages.len()))
    }

    fn next_expiry(&self) -> Result<Option<Instant>> {
        Ok(self.lock()?.next_expiry())
    }

    pub fn unacked_count(&self) -> Result<usize> {
        Ok(self.lock()?.unacked.len())
    }

    /// Removes and returns every ready message of `queue`. Used to inspect dead letters.
    pub fn purge(&self, queue: &str) -> Result<Vec<Vec<u8>>> {
        let mut state = self.lock()?;
        Ok(state
            .queues
            .get_mut(queue)
            .map(|q| {
                q.earliest_expiry = None;
                q.messages.drain(..).map(|e| e.body).collect()
            })
            .unwrap_or_default())
    }

    /// Waits until `queues` hold no ready messages and nothing is awaiting acknowledgement.
    pub async fn wait_idle(&self, queues: &[&str]) -> Result<()> {
        loop {
            let changed = self.inner.changed.notified();
            let deadline = {
                let mut state = self.lock()?;
                state.sweep(Instant::now());
                let busy = !state.unacked.is_empty()
                    || queues
                        .iter()
                        .any(|q| state.queues.get(*q).is_some_and(|q| !q.messages.is_empty()));
                if !busy {
                    return Ok(());
                }
                state.next_expiry()
            };
            wait_for_change(changed, deadline).await;
        }
    }
}

async fn wait_for_change(changed: tokio::sync::futures::Notified<'_>, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::select! {
                _ = changed => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
        None => changed.await,
    }
}

struct SessionAcker {
    broker: InMemoryBroker,
    session: u64,
}

#[async_trait]
impl Acker for SessionAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.broker.settle(self.session, delivery_tag, None)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.broker.settle(self.session, delivery_tag, Some(requeue))
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.broker.settle(self.session, delivery_tag, Some(requeue))
    }
}

/// An owned client connection to the broker.
///
/// Shared by `Arc` between the submission guard and the consumer workers.
/// The session is reopened on demand before publishing or consuming; if that
/// fails the caller gets a transient [`LedgerError::Broker`].
pub struct BrokerConnection {
    broker: InMemoryBroker,
    topology: QueueTopology,
    session: Mutex<Option<u64>>,
}

impl BrokerConnection {
    /// Opens a session and declares the settlement topology.
    pub fn connect(broker: InMemoryBroker, topology: QueueTopology) -> Result<Self> {
        let connection = Self {
            broker,
            topology,
            session: Mutex::new(None),
        };
        connection.session()?;
        Ok(connection)
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn is_closed(&self) -> bool {
        match self.current() {
            Some(session) => !self.broker.is_session_open(session),
            None => true,
        }
    }

    /// Closes the session. Unacknowledged deliveries are requeued.
    pub fn close(&self) -> Result<()> {
        let session = self
            .session
            .lock()
            .map_err(|_| LedgerError::Broker("connection state poisoned".to_string()))?
            .take();
        match session {
            Some(session) => self.broker.close_session(session),
            None => Ok(()),
        }
    }

    fn current(&self) -> Option<u64> {
        self.session.lock().ok().and_then(|s| *s)
    }

    /// Returns an open session, reconnecting if the current one is closed.
    fn session(&self) -> Result<u64> {
        let mut current = self
            .session
            .lock()
            .map_err(|_| LedgerError::Broker("connection state poisoned".to_string()))?;
        if let Some(session) = *current
            && self.broker.is_session_open(session)
        {
            return Ok(session);
        }

        let reconnect = current.is_some();
        let session = self.broker.open_session()?;
        self.declare(session)?;
        *current = Some(session);
        if reconnect {
            info!(session, "broker connection re-established");
        }
        Ok(session)
    }

    fn declare(&self, session: u64) -> Result<()> {
        let t = &self.topology;
        self.broker.declare_exchange(session, &t.exchange)?;
        self.broker
            .declare_queue(session, &t.dead_letter_queue, QueueArgs::default())?;
        self.broker.declare_queue(
            session,
            &t.incoming_queue,
            QueueArgs {
                dead_letter_routing_key: Some(t.dead_letter_queue.clone()),
                message_ttl: None,
            },
        )?;
        self.broker
            .bind_queue(session, &t.incoming_queue, &t.exchange, &t.incoming_queue)?;
        self.broker
            .bind_queue(session, &t.dead_letter_queue, &t.exchange, &t.dead_letter_queue)?;
        self.broker.declare_queue(
            session,
            &t.delayed_queue,
            QueueArgs {
                dead_letter_routing_key: Some(t.incoming_queue.clone()),
                message_ttl: None,
            },
        )?;
        self.broker
            .bind_queue(session, &t.delayed_queue, &t.exchange, &t.delayed_queue)
    }
}

#[async_trait]
impl MessageChannel for BrokerConnection {
    async fn publish(&self, body: Vec<u8>) -> Result<()> {
        let session = self.session()?;
        let t = &self.topology;
        self.broker
            .publish(session, &t.exchange, &t.incoming_queue, body, None)
    }

    async fn publish_delayed(&self, body: Vec<u8>, delay: Duration) -> Result<()> {
        let session = self.session()?;
        let t = &self.topology;
        self.broker
            .publish(session, &t.exchange, &t.delayed_queue, body, Some(delay))
    }

    async fn next_delivery(&self) -> Result<Delivery> {
        loop {
            let changed = self.broker.inner.changed.notified();
            let session = self.session()?;
            if let Some((tag, envelope)) = self.broker.take(session, &self.topology.incoming_queue)? {
                let acker = Arc::new(SessionAcker {
                    broker: self.broker.clone(),
                    session,
                });
                return Ok(Delivery::new(tag, envelope.redelivered, envelope.body, acker));
            }
            let deadline = self.broker.next_expiry()?;
            wait_for_change(changed, deadline).await;
        }
    }
}

//! Connection pooling for a single MongoDB node.
//!
//! The pool is a single-threaded state machine. A reactor owns the sockets, forwards their
//! notifications through `handle_event`, and calls `handle_timeout` once `next_timeout` has
//! passed. Callbacks and event hooks run synchronously from inside those calls and must not
//! call back into the pool.
mod buckets;
pub mod connection;
mod options;
mod state;
mod work;

pub use self::buckets::Bucket;
pub use self::connection::{Connection, ConnectionEvent, ConnectionFactory, ConnectionId, Message};
pub use self::options::{PoolOptions, TlsOptions};
pub use self::state::PoolState;
pub use self::work::{Callback, CommandResult, Payload, WorkFlags, WriteOptions};

use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::mem;
use std::time::Instant;

use crate::apm::{Listener, PoolEvent};
use crate::auth::{AuthConversation, AuthProviders, AuthStep, Credentials};
use crate::error::{Error, Result};

use self::buckets::Buckets;
use self::work::WorkItem;

/// Completion callback for `auth` and `logout`.
pub type AuthCallback = Box<dyn FnOnce(Result<()>)>;

type Conversations = VecDeque<Box<dyn AuthConversation>>;

// Why a connection was opened. Decides what a failure before it is usable means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Initial,
    Growth,
    Reconnect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TaskPurpose {
    Connect,
    Reconnect,
    NewConnection,
    Straggler,
    Rotate,
    Logout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailureKind {
    Close,
    Timeout,
    ParseError,
}

// A run of auth conversations on one connection, bypassing the work queue.
struct AuthTask {
    purpose: TaskPurpose,
    // Credential sets recorded once the task succeeds.
    credentials: Vec<Credentials>,
    conversations: Conversations,
    failure: Option<Error>,
    started: bool,
}

struct Slot<C> {
    connection: C,
    origin: Origin,
    established: bool,
    item: Option<WorkItem>,
    timeout_overridden: bool,
    tasks: VecDeque<AuthTask>,
}

impl<C> Slot<C> {
    fn new(connection: C, origin: Origin) -> Slot<C> {
        Slot {
            connection,
            origin,
            established: false,
            item: None,
            timeout_overridden: false,
            tasks: VecDeque::new(),
        }
    }

    fn is_busy(&self) -> bool {
        self.item.is_some() || !self.tasks.is_empty()
    }
}

struct Rotation {
    credentials: Credentials,
    callback: AuthCallback,
    connections: Vec<ConnectionId>,
    remaining: usize,
    error: Option<Error>,
}

struct Logout {
    db: String,
    callback: AuthCallback,
    remaining: usize,
    error: Option<Error>,
}

enum PendingOp {
    Auth(Credentials, AuthCallback),
    Logout(String, AuthCallback),
}

impl PendingOp {
    fn is_auth(&self) -> bool {
        match *self {
            PendingOp::Auth(..) => true,
            PendingOp::Logout(..) => false,
        }
    }

    fn fail(self, err: Error) {
        match self {
            PendingOp::Auth(_, callback) | PendingOp::Logout(_, callback) => callback(Err(err)),
        }
    }
}

enum Routing {
    Response(WorkItem),
    AuthReply,
    Unexpected,
}

enum TaskProgress {
    Finished(Result<()>),
    WriteFailed(Error),
}

/// A bounded, self-healing set of connections to one node.
pub struct ConnectionPool<F: ConnectionFactory> {
    id: Uuid,
    options: PoolOptions,
    factory: F,
    auth_providers: AuthProviders,
    state: PoolState,
    connections: HashMap<ConnectionId, Slot<F::Connection>>,
    buckets: Buckets,
    queue: VecDeque<WorkItem>,
    next_connection_id: u64,
    executing: bool,
    execute_again: bool,
    authenticating: bool,
    logging_out: bool,
    auth_epoch: u64,
    // Credential sets every usable connection is authenticated with.
    credentials: Vec<Credentials>,
    connect_credentials: Option<Credentials>,
    rotation: Option<Rotation>,
    logout: Option<Logout>,
    pending: VecDeque<PendingOp>,
    ever_connected: bool,
    reconnect_at: Option<Instant>,
    reconnect_id: Option<ConnectionId>,
    retries_left: u32,
    unref: bool,
    listener: Listener<PoolEvent>,
}

impl<F: ConnectionFactory> fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("address", &self.options.address())
            .field("state", &self.state)
            .field("sockets", &self.connections.len())
            .field("queue", &self.queue.len())
            .finish()
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Creates a disconnected pool. Nothing is opened until `connect` or the first write.
    pub fn new(options: PoolOptions, factory: F, auth_providers: AuthProviders) -> Result<ConnectionPool<F>> {
        options.validate()?;

        Ok(ConnectionPool {
            id: Uuid::new_v4(),
            retries_left: options.reconnect_tries,
            options,
            factory,
            auth_providers,
            state: PoolState::Disconnected,
            connections: HashMap::new(),
            buckets: Buckets::new(),
            queue: VecDeque::new(),
            next_connection_id: 0,
            executing: false,
            execute_again: false,
            authenticating: false,
            logging_out: false,
            auth_epoch: 0,
            credentials: Vec::new(),
            connect_credentials: None,
            rotation: None,
            logout: None,
            pending: VecDeque::new(),
            ever_connected: false,
            reconnect_at: None,
            reconnect_id: None,
            unref: false,
            listener: Listener::new(),
        })
    }

    /// Registers a hook for pool lifecycle events.
    pub fn add_hook<H: FnMut(&PoolEvent) + 'static>(&mut self, hook: H) {
        self.listener.add_hook(hook);
    }

    /// Opens the first connection, authenticating it with `credentials` when given.
    pub fn connect(&mut self, credentials: Option<Credentials>) -> Result<()> {
        if self.state != PoolState::Disconnected || self.reconnect_at.is_some() || self.reconnect_id.is_some() {
            return Err(Error::InvalidState {
                state: self.state,
                operation: "connect",
            });
        }

        if let Some(ref credentials) = credentials {
            self.auth_providers.get(&credentials.mechanism)?;
        }

        info!(pool_id = %self.id, address = %self.options.address(), "connecting pool");
        self.connect_credentials = credentials;
        self.create_connection(Origin::Initial);
        Ok(())
    }

    /// Queues a write. The callback may only be omitted for `no_response` writes.
    ///
    /// Once the pool is destroying the callback fails with `PoolDestroyed` before this returns.
    pub fn write<P: Into<Payload>>(
        &mut self,
        payload: P,
        options: WriteOptions,
        callback: Option<Callback>,
    ) -> Result<()> {
        if callback.is_none() && !options.no_response {
            return Err(Error::ArgumentError(
                "a callback is required unless no_response is set.".to_owned(),
            ));
        }

        if self.state.is_terminal() {
            return match callback {
                Some(callback) => {
                    callback(Err(Error::PoolDestroyed));
                    Ok(())
                }
                None => Err(Error::PoolDestroyed),
            };
        }

        let item = WorkItem::new(payload.into(), &options, callback);
        if item.is_monitoring() {
            self.queue.push_front(item);
        } else {
            self.queue.push_back(item);
        }

        self.execute();
        Ok(())
    }

    /// Authenticates every idle connection with a new credential set.
    ///
    /// Connections busy with a write are brought up to date when their reply arrives. Calls
    /// made while another rotation or a logout is running are queued.
    pub fn auth(&mut self, credentials: Credentials, callback: AuthCallback) -> Result<()> {
        if self.state != PoolState::Connected {
            return Err(Error::InvalidState {
                state: self.state,
                operation: "auth",
            });
        }

        self.auth_providers.get(&credentials.mechanism)?;

        self.authenticating = true;
        self.auth_epoch += 1;

        if self.rotation.is_some() || self.logging_out {
            debug!(pool_id = %self.id, source = %credentials.source, "queueing authentication");
            self.pending.push_back(PendingOp::Auth(credentials, callback));
            return Ok(());
        }

        self.start_rotation(credentials, callback);
        Ok(())
    }

    /// Logs every idle and busy connection out of `db`.
    pub fn logout(&mut self, db: &str, callback: AuthCallback) -> Result<()> {
        if self.state.is_terminal() {
            callback(Err(Error::PoolDestroyed));
            return Ok(());
        }

        if self.rotation.is_some() || self.logging_out {
            self.pending.push_back(PendingOp::Logout(db.to_owned(), callback));
            return Ok(());
        }

        self.start_logout(db.to_owned(), callback);
        Ok(())
    }

    /// Fails queued work and closes every socket once in-flight work has completed.
    pub fn destroy(&mut self) {
        self.destroy_with(false)
    }

    /// Like `destroy`, but with `force` in-flight work is failed and every socket closed at once.
    pub fn destroy_with(&mut self, force: bool) {
        if self.state.is_terminal() {
            return;
        }

        info!(pool_id = %self.id, in_flight = self.in_flight_count(), force, "destroying pool");
        self.set_state(PoolState::Destroying);
        self.reconnect_at = None;
        self.authenticating = self.rotation.is_some();

        let queued: Vec<WorkItem> = self.queue.drain(..).collect();
        let pending: Vec<PendingOp> = self.pending.drain(..).collect();

        for item in queued {
            item.complete(Err(Error::PoolDestroyed));
        }
        for op in pending {
            op.fail(Error::PoolDestroyed);
        }

        if force {
            self.close_all(|| Error::PoolDestroyed);
        }
        self.check_drain();
    }

    /// Closes every socket and opens a fresh one. Queued work waits for the new socket.
    ///
    /// In-flight operations fail with `ConnectionClosed`.
    pub fn reset(&mut self) -> Result<()> {
        if self.state != PoolState::Connected {
            return Err(Error::InvalidState {
                state: self.state,
                operation: "reset",
            });
        }

        info!(pool_id = %self.id, sockets = self.connections.len(), "resetting pool");
        let address = self.options.address();
        self.close_all(|| Error::ConnectionClosed(address.clone()));

        if self.state == PoolState::Connected && self.connections.is_empty() {
            self.create_connection(Origin::Growth);
        }
        Ok(())
    }

    /// Marks every current and future socket as not keeping the reactor alive.
    pub fn unref(&mut self) {
        self.unref = true;
        for slot in self.connections.values_mut() {
            slot.connection.unref();
        }
    }

    /// Delivers a transport notification for one connection.
    pub fn handle_event(&mut self, id: ConnectionId, event: ConnectionEvent) {
        if !self.connections.contains_key(&id) {
            trace!(pool_id = %self.id, connection_id = %id, "dropping event for detached connection");
            return;
        }

        match event {
            ConnectionEvent::Connect => self.on_connect(id),
            ConnectionEvent::Message(message) => self.on_message(id, message),
            ConnectionEvent::Error(err) => self.handle_failure(id, FailureKind::Close, err),
            ConnectionEvent::Close => {
                let err = Error::ConnectionClosed(self.options.address());
                self.handle_failure(id, FailureKind::Close, err)
            }
            ConnectionEvent::Timeout => {
                let err = Error::ConnectionTimeout(self.options.address());
                self.handle_failure(id, FailureKind::Timeout, err)
            }
            ConnectionEvent::ParseError(msg) => {
                self.handle_failure(id, FailureKind::ParseError, Error::ParseError(msg))
            }
        }
    }

    /// Runs a reconnect attempt if one is due.
    pub fn handle_timeout(&mut self, now: Instant) {
        match self.reconnect_at {
            Some(at) if at <= now => {
                self.reconnect_at = None;
                self.attempt_reconnect();
            }
            _ => (),
        }
    }

    /// The instant the next reconnect attempt is due.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Every live socket, including those detached while authenticating.
    pub fn socket_count(&self) -> usize {
        self.connections.len()
    }

    pub fn available_count(&self) -> usize {
        self.buckets.len(Bucket::Available)
    }

    pub fn in_use_count(&self) -> usize {
        self.buckets.len(Bucket::InUse)
    }

    pub fn connecting_count(&self) -> usize {
        self.buckets.len(Bucket::Connecting)
    }

    pub fn non_authenticated_count(&self) -> usize {
        self.buckets.len(Bucket::NonAuthenticated)
    }

    /// The bucket holding `id`, or `None` if it is detached or gone.
    pub fn bucket_of(&self, id: ConnectionId) -> Option<Bucket> {
        self.buckets.locate(id)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_connected(&self) -> bool {
        self.state == PoolState::Connected
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == PoolState::Disconnected
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_authenticating(&self) -> bool {
        self.authenticating
    }

    pub fn auth_epoch(&self) -> u64 {
        self.auth_epoch
    }

    /// Established credential sets, replayed on every new connection.
    pub fn credentials(&self) -> &[Credentials] {
        &self.credentials
    }

    fn in_flight_count(&self) -> usize {
        self.connections.values().filter(|slot| slot.item.is_some()).count()
    }

    fn set_state(&mut self, next: PoolState) -> bool {
        if !self.state.can_transition_to(next) {
            error!(pool_id = %self.id, from = %self.state, to = %next, "illegal pool state transition");
            return false;
        }

        if self.state != next {
            debug!(pool_id = %self.id, from = %self.state, to = %next, "pool state changed");
        }
        self.state = next;
        true
    }

    fn create_connection(&mut self, origin: Origin) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;

        let mut connection = self.factory.create(id, &self.options);
        if self.unref {
            connection.unref();
        }

        if self.state == PoolState::Disconnected {
            self.set_state(PoolState::Connecting);
        }

        debug!(pool_id = %self.id, connection_id = %id, origin = ?origin, "opening connection");
        self.buckets.insert(id, Bucket::Connecting);
        self.connections.insert(id, Slot::new(connection, origin));
        if let Some(slot) = self.connections.get_mut(&id) {
            slot.connection.connect();
        }
        id
    }

    // Removes and closes a connection without any failure handling.
    fn discard(&mut self, id: ConnectionId) {
        self.buckets.remove(id);
        if let Some(mut slot) = self.connections.remove(&id) {
            slot.connection.destroy();
        }
    }

    // Closes every socket, failing whatever each one was carrying.
    fn close_all<E: Fn() -> Error>(&mut self, err: E) {
        let slots: Vec<Slot<F::Connection>> = self.connections.drain().map(|(_, slot)| slot).collect();
        self.buckets.clear();
        self.reconnect_id = None;

        let mut items = Vec::new();
        let mut tasks = Vec::new();
        for mut slot in slots {
            slot.connection.destroy();
            items.extend(slot.item.take());
            tasks.extend(slot.tasks.drain(..).map(|task| task.purpose));
        }

        for item in items {
            item.complete(Err(err()));
        }
        for purpose in tasks {
            self.settle_shared(purpose, Err(err()));
        }
    }

    fn release(&mut self, id: ConnectionId) {
        if !self.connections.contains_key(&id) {
            return;
        }

        let bucket = if self.authenticating && !self.state.is_terminal() {
            Bucket::NonAuthenticated
        } else {
            Bucket::Available
        };
        self.buckets.insert(id, bucket);
    }

    fn mark_established(&mut self, id: ConnectionId) {
        if let Some(slot) = self.connections.get_mut(&id) {
            slot.established = true;
        }

        if self.state == PoolState::Connecting {
            self.set_state(PoolState::Connected);
        }
    }

    fn can_grow(&self) -> bool {
        if self.logging_out {
            return false;
        }

        match self.state {
            PoolState::Connected => true,
            PoolState::Disconnected => self.reconnect_at.is_none() && self.reconnect_id.is_none(),
            _ => false,
        }
    }

    fn execute(&mut self) {
        if self.executing {
            self.execute_again = true;
            return;
        }

        self.executing = true;
        loop {
            self.execute_again = false;
            self.dispatch();
            if !self.execute_again {
                break;
            }
        }
        self.executing = false;
    }

    fn dispatch(&mut self) {
        loop {
            if self.state.is_terminal() || self.authenticating || self.queue.is_empty() {
                return;
            }

            let available = self.buckets.len(Bucket::Available);
            let connecting = self.buckets.len(Bucket::Connecting);

            if self.connections.len() < self.options.size
                && available == 0
                && connecting == 0
                && self.can_grow()
            {
                let origin = if self.ever_connected {
                    Origin::Growth
                } else {
                    Origin::Initial
                };
                self.create_connection(origin);
                return;
            }

            if available == 0 {
                // Monitoring fails fast only when no socket is on its way either.
                if connecting == 0 {
                    self.flush_monitoring();
                }
                return;
            }

            let id = match self.buckets.pop_available() {
                Some(id) => id,
                None => return,
            };

            let connected = self
                .connections
                .get(&id)
                .map_or(false, |slot| slot.connection.is_connected());
            if !connected {
                let err = Error::ConnectionClosed(self.options.address());
                self.handle_failure(id, FailureKind::Close, err);
                self.flush_monitoring();
                continue;
            }

            match self.queue.pop_front() {
                Some(item) => self.dispatch_item(id, item),
                None => self.release(id),
            }
        }
    }

    fn dispatch_item(&mut self, id: ConnectionId, mut item: WorkItem) {
        item.stamp(self.authenticating, self.auth_epoch);

        let timeout = match item.socket_timeout {
            Some(timeout) => Some(timeout),
            None if item.is_monitoring() => Some(self.options.monitoring_socket_timeout()),
            None => None,
        };

        let written = match self.connections.get_mut(&id) {
            Some(slot) => {
                if let Some(timeout) = timeout {
                    slot.connection.set_socket_timeout(timeout);
                    slot.timeout_overridden = true;
                }

                item.payload
                    .buffers()
                    .into_iter()
                    .map(|buffer| slot.connection.write(buffer))
                    .collect::<::std::io::Result<Vec<()>>>()
            }
            None => {
                self.queue.push_front(item);
                return;
            }
        };

        if let Err(err) = written {
            debug!(pool_id = %self.id, connection_id = %id, error = %err, "write failed, requeueing");
            self.queue.push_front(item);
            self.handle_failure(id, FailureKind::Close, Error::from(err));
            return;
        }

        trace!(pool_id = %self.id, connection_id = %id, flags = ?item.flags, "dispatched");

        if item.releases_immediately() {
            if let Some(slot) = self.connections.get_mut(&id) {
                if slot.timeout_overridden {
                    slot.connection.reset_socket_timeout();
                    slot.timeout_overridden = false;
                }
            }
            self.release(id);
            item.complete(Ok(CommandResult::acknowledged(id)));
            return;
        }

        self.buckets.insert(id, Bucket::InUse);
        if let Some(slot) = self.connections.get_mut(&id) {
            slot.item = Some(item);
        }
    }

    fn flush_monitoring(&mut self) {
        if !self.queue.iter().any(|item| item.is_monitoring()) {
            return;
        }

        let (flushed, kept): (VecDeque<WorkItem>, VecDeque<WorkItem>) =
            self.queue.drain(..).partition(|item| item.is_monitoring());
        self.queue = kept;

        debug!(pool_id = %self.id, count = flushed.len(), "flushing monitoring operations");
        for item in flushed {
            item.complete(Err(Error::NoConnectionAvailable));
        }
    }

    fn on_connect(&mut self, id: ConnectionId) {
        let origin = match self.connections.get(&id) {
            Some(slot) => slot.origin,
            None => return,
        };

        debug!(pool_id = %self.id, connection_id = %id, "connection established");

        match origin {
            Origin::Initial => match self.connect_credentials.clone() {
                Some(credentials) => {
                    let conversations = self.auth_providers.authenticate(&credentials);
                    self.queue_task(id, TaskPurpose::Connect, conversations, vec![credentials], false);
                    self.run_next_task(id);
                }
                None => self.complete_connect(id, Vec::new()),
            },
            Origin::Reconnect => {
                if self.credentials.is_empty() {
                    self.complete_reconnect(id);
                } else {
                    let conversations = self.auth_providers.reauthenticate(&self.credentials);
                    self.queue_task(id, TaskPurpose::Reconnect, conversations, Vec::new(), false);
                    self.run_next_task(id);
                }
            }
            Origin::Growth => {
                if self.authenticating || self.logging_out {
                    self.mark_established(id);
                    self.buckets.insert(id, Bucket::NonAuthenticated);
                } else if self.credentials.is_empty() {
                    self.mark_established(id);
                    self.release(id);
                    self.execute();
                } else {
                    let conversations = self.auth_providers.reauthenticate(&self.credentials);
                    self.queue_task(id, TaskPurpose::NewConnection, conversations, Vec::new(), false);
                    self.run_next_task(id);
                }
            }
        }
    }

    fn complete_connect(&mut self, id: ConnectionId, credentials: Vec<Credentials>) {
        if self.state.is_terminal() {
            self.release(id);
            self.check_drain();
            return;
        }

        for credentials in credentials {
            self.remember(credentials);
        }
        self.connect_credentials = None;
        self.ever_connected = true;
        self.retries_left = self.options.reconnect_tries;
        self.mark_established(id);
        self.buckets.insert(id, Bucket::Available);

        info!(pool_id = %self.id, address = %self.options.address(), "pool connected");
        self.listener.emit(&PoolEvent::Connect);
        self.fill_to_min_size();
        self.execute();
    }

    fn fill_to_min_size(&mut self) {
        while self.state == PoolState::Connected
            && !self.logging_out
            && self.connections.len() < self.options.min_size
        {
            self.create_connection(Origin::Growth);
        }
    }

    fn complete_reconnect(&mut self, id: ConnectionId) {
        self.reconnect_id = None;

        if self.state.is_terminal() {
            self.release(id);
            self.check_drain();
            return;
        }

        self.retries_left = self.options.reconnect_tries;
        self.mark_established(id);
        self.buckets.insert(id, Bucket::Available);

        info!(pool_id = %self.id, address = %self.options.address(), "pool reconnected");
        self.listener.emit(&PoolEvent::Reconnect);
        self.fill_to_min_size();
        self.execute();
    }

    fn fail_initial_connect(&mut self, err: Error) {
        if self.state.is_terminal() {
            self.check_drain();
            return;
        }

        error!(pool_id = %self.id, address = %self.options.address(), error = %err, "initial connect failed");
        self.listener.emit(&PoolEvent::Error(err));
        self.destroy();
    }

    fn schedule_reconnect(&mut self) {
        if !self.options.reconnect
            || !self.ever_connected
            || self.reconnect_at.is_some()
            || self.reconnect_id.is_some()
        {
            return;
        }

        debug!(pool_id = %self.id, retries_left = self.retries_left, "scheduling reconnect");
        self.reconnect_at = Some(Instant::now() + self.options.reconnect_interval());
    }

    fn attempt_reconnect(&mut self) {
        if self.state.is_terminal() {
            return;
        }

        info!(pool_id = %self.id, retries_left = self.retries_left, "attempting reconnect");
        self.listener.emit(&PoolEvent::AttemptReconnect);
        let id = self.create_connection(Origin::Reconnect);
        self.reconnect_id = Some(id);
    }

    fn reconnect_attempt_failed(&mut self, err: Error) {
        self.reconnect_id = None;

        if self.state.is_terminal() {
            self.check_drain();
            return;
        }

        self.retries_left = self.retries_left.saturating_sub(1);
        if self.retries_left == 0 {
            let failure = Error::ReconnectFailed {
                attempts: self.options.reconnect_tries,
                interval_ms: self.options.reconnect_interval_ms,
                cause: Some(Box::new(err)),
            };
            error!(pool_id = %self.id, error = %failure, "giving up on reconnect");
            self.listener.emit(&PoolEvent::ReconnectFailed(failure));
            self.destroy();
            return;
        }

        warn!(pool_id = %self.id, retries_left = self.retries_left, error = %err, "reconnect attempt failed");
        self.set_state(PoolState::Disconnected);
        self.reconnect_at = Some(Instant::now() + self.options.reconnect_interval());
    }

    fn handle_failure(&mut self, id: ConnectionId, kind: FailureKind, err: Error) {
        let mut slot = match self.connections.remove(&id) {
            Some(slot) => slot,
            None => return,
        };
        self.buckets.remove(id);
        slot.connection.destroy();

        warn!(pool_id = %self.id, connection_id = %id, error = %err, "connection failed");

        if !slot.established {
            match slot.origin {
                Origin::Initial => return self.fail_initial_connect(err),
                Origin::Reconnect => return self.reconnect_attempt_failed(err),
                Origin::Growth => (),
            }
        }

        let item = slot.item.take();
        let tasks = mem::replace(&mut slot.tasks, VecDeque::new());

        if self.connections.is_empty() && !self.state.is_terminal() {
            self.set_state(PoolState::Disconnected);
            let event = match kind {
                FailureKind::Close => PoolEvent::Close(Some(err.clone())),
                FailureKind::Timeout => PoolEvent::Timeout(Some(err.clone())),
                FailureKind::ParseError => PoolEvent::ParseError(Some(err.clone())),
            };
            info!(pool_id = %self.id, event = %event, "last connection lost");
            self.listener.emit(&event);
            self.schedule_reconnect();
        }

        for task in tasks {
            self.settle_shared(task.purpose, Err(err.clone()));
        }

        self.fill_to_min_size();
        self.execute();
        if let Some(item) = item {
            item.complete(Err(err));
        }
        self.check_drain();
    }

    fn on_message(&mut self, id: ConnectionId, message: Message) {
        let routing = match self.connections.get_mut(&id) {
            None => return,
            Some(slot) => match slot.item.take() {
                Some(item) => {
                    if slot.timeout_overridden {
                        slot.connection.reset_socket_timeout();
                        slot.timeout_overridden = false;
                    }
                    Routing::Response(item)
                }
                None if slot.tasks.front().map_or(false, |task| task.started) => Routing::AuthReply,
                None => Routing::Unexpected,
            },
        };

        match routing {
            Routing::Response(item) => self.on_response(id, item, message),
            Routing::AuthReply => {
                let reply = message.documents.into_iter().next();
                match reply {
                    None => self.finish_task(
                        id,
                        Err(Error::AuthenticationError("empty reply.".to_owned())),
                    ),
                    Some(doc) => match Error::from_command_document(&doc) {
                        Some(err) => self.finish_task(id, Err(err)),
                        None => self.advance_task(id, Some(doc)),
                    },
                }
            }
            Routing::Unexpected => {
                warn!(pool_id = %self.id, connection_id = %id, "discarding unexpected message");
            }
        }
    }

    fn on_response(&mut self, id: ConnectionId, item: WorkItem, message: Message) {
        let result = decode_reply(message, item.is_command(), id);

        if self.state.is_terminal() {
            self.abandon_tasks(id);
            self.release(id);
        } else {
            if item.needs_reauthentication(self.auth_epoch)
                && !self.authenticating
                && !self.credentials.is_empty()
            {
                debug!(pool_id = %self.id, connection_id = %id, "re-authenticating straggler");
                let conversations = self.auth_providers.reauthenticate(&self.credentials);
                self.queue_task(id, TaskPurpose::Straggler, conversations, Vec::new(), true);
            }

            let has_tasks = self
                .connections
                .get(&id)
                .map_or(false, |slot| !slot.tasks.is_empty());
            if has_tasks {
                self.buckets.remove(id);
                self.run_next_task(id);
            } else {
                self.release(id);
            }
        }

        self.execute();
        item.complete(result);
        self.check_drain();
    }

    fn queue_task(
        &mut self,
        id: ConnectionId,
        purpose: TaskPurpose,
        conversations: Result<Conversations>,
        credentials: Vec<Credentials>,
        front: bool,
    ) {
        let (conversations, failure) = match conversations {
            Ok(conversations) => (conversations, None),
            Err(err) => (VecDeque::new(), Some(err)),
        };

        let task = AuthTask {
            purpose,
            credentials,
            conversations,
            failure,
            started: false,
        };

        if let Some(slot) = self.connections.get_mut(&id) {
            if front {
                slot.tasks.push_front(task);
            } else {
                slot.tasks.push_back(task);
            }
        }
    }

    fn run_next_task(&mut self, id: ConnectionId) {
        let start = match self.connections.get_mut(&id) {
            Some(slot) if slot.item.is_none() => match slot.tasks.front_mut() {
                Some(task) if !task.started => {
                    task.started = true;
                    true
                }
                _ => false,
            },
            _ => false,
        };

        if start {
            self.advance_task(id, None);
        }
    }

    fn advance_task(&mut self, id: ConnectionId, mut reply: Option<bson::Document>) {
        let progress = loop {
            let slot = match self.connections.get_mut(&id) {
                Some(slot) => slot,
                None => return,
            };
            let task = match slot.tasks.front_mut() {
                Some(task) => task,
                None => return,
            };

            if let Some(err) = task.failure.take() {
                break TaskProgress::Finished(Err(err));
            }

            let step = match task.conversations.front_mut() {
                Some(conversation) => conversation.step(reply.take().as_ref()),
                None => break TaskProgress::Finished(Ok(())),
            };

            match step {
                Ok(AuthStep::Send(bytes)) => match slot.connection.write(&bytes) {
                    Ok(()) => return,
                    Err(err) => break TaskProgress::WriteFailed(Error::from(err)),
                },
                Ok(AuthStep::Done) => {
                    task.conversations.pop_front();
                }
                Err(err) => break TaskProgress::Finished(Err(err)),
            }
        };

        match progress {
            TaskProgress::Finished(result) => self.finish_task(id, result),
            TaskProgress::WriteFailed(err) => self.handle_failure(id, FailureKind::Close, err),
        }
    }

    fn finish_task(&mut self, id: ConnectionId, result: Result<()>) {
        let task = match self.connections.get_mut(&id).and_then(|slot| slot.tasks.pop_front()) {
            Some(task) => task,
            None => return,
        };

        if let Err(ref err) = result {
            warn!(pool_id = %self.id, connection_id = %id, purpose = ?task.purpose, error = %err, "authentication task failed");
        }

        match task.purpose {
            TaskPurpose::Connect => match result {
                Ok(()) => self.complete_connect(id, task.credentials),
                Err(err) => {
                    self.discard(id);
                    self.fail_initial_connect(err);
                }
            },
            TaskPurpose::Reconnect => match result {
                Ok(()) => self.complete_reconnect(id),
                Err(err) => {
                    self.discard(id);
                    self.reconnect_attempt_failed(err);
                }
            },
            TaskPurpose::NewConnection | TaskPurpose::Straggler => match result {
                Ok(()) => {
                    self.mark_established(id);
                    self.continue_tasks(id);
                }
                Err(err) => self.handle_failure(id, FailureKind::Close, err),
            },
            // The connection stays detached until the whole rotation ends.
            TaskPurpose::Rotate => self.settle_shared(TaskPurpose::Rotate, result),
            TaskPurpose::Logout => {
                self.continue_tasks(id);
                self.settle_shared(TaskPurpose::Logout, result);
            }
        }
    }

    fn continue_tasks(&mut self, id: ConnectionId) {
        let more = self
            .connections
            .get(&id)
            .map_or(false, |slot| !slot.tasks.is_empty());

        if more {
            self.run_next_task(id);
        } else {
            self.release(id);
            self.execute();
            self.check_drain();
        }
    }

    // Drops tasks that never started on a connection of a destroying pool.
    fn abandon_tasks(&mut self, id: ConnectionId) {
        let tasks = match self.connections.get_mut(&id) {
            Some(slot) => mem::replace(&mut slot.tasks, VecDeque::new()),
            None => return,
        };

        for task in tasks {
            self.settle_shared(task.purpose, Err(Error::PoolDestroyed));
        }
    }

    // Counts a rotation or logout task as done, finishing the operation on the last one.
    fn settle_shared(&mut self, purpose: TaskPurpose, result: Result<()>) {
        match purpose {
            TaskPurpose::Rotate => {
                let done = match self.rotation.as_mut() {
                    Some(rotation) => {
                        if let Err(err) = result {
                            rotation.error.get_or_insert(err);
                        }
                        rotation.remaining = rotation.remaining.saturating_sub(1);
                        rotation.remaining == 0
                    }
                    None => false,
                };
                if done {
                    self.finish_rotation();
                }
            }
            TaskPurpose::Logout => {
                let done = match self.logout.as_mut() {
                    Some(logout) => {
                        if let Err(err) = result {
                            logout.error.get_or_insert(err);
                        }
                        logout.remaining = logout.remaining.saturating_sub(1);
                        logout.remaining == 0
                    }
                    None => false,
                };
                if done {
                    self.finish_logout();
                }
            }
            _ => (),
        }
    }

    fn start_rotation(&mut self, credentials: Credentials, callback: AuthCallback) {
        self.authenticating = true;
        let ids = self.buckets.take_available();

        info!(
            pool_id = %self.id,
            mechanism = %credentials.mechanism,
            source = %credentials.source,
            connections = ids.len(),
            "authenticating pool"
        );

        self.rotation = Some(Rotation {
            credentials: credentials.clone(),
            callback,
            connections: ids.clone(),
            remaining: ids.len(),
            error: None,
        });

        if ids.is_empty() {
            return self.finish_rotation();
        }

        for &id in &ids {
            let conversations = self.auth_providers.authenticate(&credentials);
            self.queue_task(id, TaskPurpose::Rotate, conversations, Vec::new(), false);
        }
        for id in ids {
            self.run_next_task(id);
        }
    }

    fn finish_rotation(&mut self) {
        let rotation = match self.rotation.take() {
            Some(rotation) => rotation,
            None => return,
        };

        let result = match rotation.error {
            Some(err) => Err(err),
            None => Ok(()),
        };
        if result.is_ok() {
            self.remember(rotation.credentials);
        }

        self.authenticating = self.pending.iter().any(PendingOp::is_auth);

        for id in rotation.connections {
            if self.connections.contains_key(&id) {
                self.buckets.insert(id, Bucket::Available);
            }
        }

        if !self.authenticating {
            self.authenticate_parked();
        }

        match result {
            Ok(()) => info!(pool_id = %self.id, "pool authenticated"),
            Err(ref err) => warn!(pool_id = %self.id, error = %err, "pool authentication failed"),
        }

        (rotation.callback)(result);
        self.start_next_pending();
        self.execute();
        self.check_drain();
    }

    // Brings connections parked in `NonAuthenticated` up to the established credentials.
    fn authenticate_parked(&mut self) {
        let parked = self.buckets.take_non_authenticated();
        if self.credentials.is_empty() {
            for id in parked {
                self.buckets.insert(id, Bucket::Available);
            }
            return;
        }

        for &id in &parked {
            let conversations = self.auth_providers.reauthenticate(&self.credentials);
            self.queue_task(id, TaskPurpose::Straggler, conversations, Vec::new(), false);
        }
        for id in parked {
            self.run_next_task(id);
        }
    }

    fn start_logout(&mut self, db: String, callback: AuthCallback) {
        self.logging_out = true;

        let available = self.buckets.take_available();
        let in_use = self.buckets.in_use().to_vec();
        // Connections still authenticating log out once their current task is done.
        let detached: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|&(&id, slot)| {
                (slot.established || slot.origin == Origin::Growth)
                    && !slot.tasks.is_empty()
                    && self.buckets.locate(id).is_none()
            })
            .map(|(&id, _)| id)
            .collect();
        let remaining = available.len() + in_use.len() + detached.len();

        debug!(pool_id = %self.id, db = %db, connections = remaining, "logging out");

        self.logout = Some(Logout {
            db: db.clone(),
            callback,
            remaining,
            error: None,
        });

        if remaining == 0 {
            return self.finish_logout();
        }

        for &id in available.iter().chain(in_use.iter()).chain(detached.iter()) {
            let conversations = self.auth_providers.logout(&db).map(|conversation| {
                let mut conversations: Conversations = VecDeque::with_capacity(1);
                conversations.push_back(conversation);
                conversations
            });
            self.queue_task(id, TaskPurpose::Logout, conversations, Vec::new(), false);
        }

        // Busy connections log out once their reply arrives.
        for id in available {
            self.run_next_task(id);
        }
    }

    fn finish_logout(&mut self) {
        let logout = match self.logout.take() {
            Some(logout) => logout,
            None => return,
        };

        self.logging_out = false;
        self.credentials.retain(|credentials| credentials.source != logout.db);
        if !self.authenticating {
            self.authenticate_parked();
        }

        let result = match logout.error {
            Some(err) => Err(err),
            None => Ok(()),
        };

        debug!(pool_id = %self.id, db = %logout.db, ok = result.is_ok(), "logout finished");

        (logout.callback)(result);
        self.start_next_pending();
        self.execute();
        self.check_drain();
    }

    fn start_next_pending(&mut self) {
        while self.rotation.is_none() && !self.logging_out {
            let op = match self.pending.pop_front() {
                Some(op) => op,
                None => return,
            };

            match op {
                PendingOp::Auth(credentials, callback) => {
                    if self.state != PoolState::Connected {
                        self.authenticating = self.pending.iter().any(PendingOp::is_auth);
                        callback(Err(Error::InvalidState {
                            state: self.state,
                            operation: "auth",
                        }));
                        continue;
                    }
                    self.start_rotation(credentials, callback);
                }
                PendingOp::Logout(db, callback) => self.start_logout(db, callback),
            }
        }
    }

    fn remember(&mut self, credentials: Credentials) {
        self.credentials.retain(|existing| !existing.supersedes(&credentials));
        self.credentials.push(credentials);
    }

    fn check_drain(&mut self) {
        if self.state != PoolState::Destroying {
            return;
        }

        let busy = self.rotation.is_some()
            || self.logout.is_some()
            || self.connections.values().any(Slot::is_busy);
        if busy {
            trace!(pool_id = %self.id, "waiting for in-flight work before destroying");
            return;
        }

        for (_, mut slot) in self.connections.drain() {
            slot.connection.destroy();
        }
        self.buckets.clear();
        self.reconnect_id = None;

        self.set_state(PoolState::Destroyed);
        info!(pool_id = %self.id, "pool destroyed");
        self.listener.emit(&PoolEvent::Destroyed);
    }
}

fn decode_reply(message: Message, command: bool, id: ConnectionId) -> Result<CommandResult> {
    let doc = message
        .documents
        .into_iter()
        .next()
        .ok_or_else(|| Error::ResponseError("reply contains no documents.".to_owned()))?;

    let err = if command {
        Error::from_command_document(&doc)
    } else {
        Error::from_query_document(&doc)
    };

    match err {
        Some(err) => Err(err),
        None => Ok(CommandResult::new(doc, id)),
    }
}

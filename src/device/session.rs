use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::constants::{CONNECT_DEADLINE, WRITE_DEADLINE};
use crate::device::transport::{Connector, Link};
use crate::device::types::{ConnectionState, PeerAddress};
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect_deadline: Duration,
    pub write_deadline: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            connect_deadline: Duration::from_millis(CONNECT_DEADLINE),
            write_deadline: Duration::from_millis(WRITE_DEADLINE),
        }
    }
}

struct Attempt {
    id: u64,
    cancel: CancellationToken,
}

struct SessionInner {
    link: Option<Link>,
    attempt: Option<Attempt>,
    next_attempt_id: u64,
}

struct SessionShared {
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    // held for every transition and every write
    inner: Mutex<SessionInner>,
    state: watch::Sender<ConnectionState>,
    last_failure: StdMutex<Option<String>>,
}

impl SessionShared {
    fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state.clone());
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    fn record_failure(&self, err: &TransportError) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }

    async fn write(&self, link: &mut Link, bytes: &[u8]) -> Result<(), TransportError> {
        let deadline = self.options.write_deadline;

        match timeout(deadline, link.write_record(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(TransportError::Write { source }),
            Err(_) => Err(TransportError::WriteDeadline { deadline_ms: deadline.as_millis() as u64 }),
        }
    }

    async fn release_link(&self, inner: &mut MutexGuard<'_, SessionInner>) {
        if let Some(link) = inner.link.take() {
            info!("Closing connection");
            link.close().await;
        }
    }

    async fn tear_down(&self, inner: &mut MutexGuard<'_, SessionInner>) {
        if let Some(attempt) = inner.attempt.take() {
            info!("Cancelling in-flight connection attempt");
            attempt.cancel.cancel();
        }
        self.release_link(inner).await;
    }

    // must be called with the inner lock held
    fn is_current(&self, inner: &SessionInner, id: u64, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled()
            && self.state() != ConnectionState::Closed
            && matches!(&inner.attempt, Some(attempt) if attempt.id == id)
    }

    async fn run_attempt(self: Arc<Self>, id: u64, cancel: CancellationToken, peer: PeerAddress, greeting: Option<Vec<u8>>) {
        info!("Connecting to {}...", peer);
        let deadline = self.options.connect_deadline;

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Connection attempt to {} cancelled", peer.address);
                return;
            },
            result = timeout(deadline, self.connector.connect(&peer)) => match result {
                Ok(Ok(link)) => Ok(link),
                Ok(Err(source)) => Err(TransportError::Connect { address: peer.address.clone(), source }),
                Err(_) => Err(TransportError::ConnectDeadline {
                    address: peer.address.clone(),
                    deadline_ms: deadline.as_millis() as u64,
                }),
            },
        };

        let mut inner = self.inner.lock().await;

        if !self.is_current(&inner, id, &cancel) {
            drop(inner);
            match result {
                Ok(link) => {
                    info!("Connection attempt to {} was superseded, closing it", peer.address);
                    link.close().await;
                },
                Err(err) => debug!("Superseded connection attempt failed: {}", err),
            }
            return;
        }
        inner.attempt = None;

        let mut link = match result {
            Ok(link) => link,
            Err(err) => {
                warn!("Connecting to {} failed: {}", peer.address, err);
                self.record_failure(&err);
                self.set_state(ConnectionState::Failed(err.to_string()));
                self.set_state(ConnectionState::Idle);
                return;
            },
        };

        if let Some(greeting) = greeting {
            if let Err(err) = self.write(&mut link, &greeting).await {
                warn!("Sending greeting to {} failed: {}", peer.address, err);
                link.close().await;
                self.record_failure(&err);
                self.set_state(ConnectionState::Failed(err.to_string()));
                self.set_state(ConnectionState::Idle);
                return;
            }
        }

        inner.link = Some(link);
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.set_state(ConnectionState::Connected);
        info!("Connected to {}", peer);
    }
}

/**
 * Owns the single outbound connection to the peer.
 *
 * Transitions (`connect`, `disconnect`) and writes are serialized by one
 * internal lock, so a record is always written and flushed completely before
 * the next one starts, and a disconnect never observes a half-installed link.
 * The blocking parts of a connect run in a spawned task.
 */
pub struct DeviceSession {
    shared: Arc<SessionShared>,
}

impl DeviceSession {
    pub fn new(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);

        DeviceSession {
            shared: Arc::new(SessionShared {
                connector,
                options,
                inner: Mutex::new(SessionInner { link: None, attempt: None, next_attempt_id: 0 }),
                state,
                last_failure: StdMutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// The reason the most recent connect or write failed, cleared by a successful connect.
    pub fn last_failure(&self) -> Option<String> {
        self.shared.last_failure.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Starts a connection attempt in the background; `greeting` is written
    /// before the session reports `Connected`. Returns `false` without doing
    /// anything if an attempt is in flight or the session is connected or closed.
    pub async fn connect(&self, peer: PeerAddress, greeting: Option<Vec<u8>>) -> bool {
        let mut inner = self.shared.inner.lock().await;

        match self.shared.state() {
            ConnectionState::Connecting => {
                warn!("Already connecting");
                return false;
            },
            ConnectionState::Connected => {
                warn!("Already connected");
                return false;
            },
            ConnectionState::Closed => {
                warn!("Session is closed");
                return false;
            },
            ConnectionState::Idle | ConnectionState::Failed(_) => {},
        }

        let id = inner.next_attempt_id;
        inner.next_attempt_id += 1;
        let cancel = CancellationToken::new();

        if let Some(previous) = inner.attempt.replace(Attempt { id, cancel: cancel.clone() }) {
            previous.cancel.cancel();
        }
        self.shared.set_state(ConnectionState::Connecting);
        drop(inner);

        spawn(self.shared.clone().run_attempt(id, cancel, peer, greeting));
        true
    }

    /// Writes and flushes one record. Returns `false` if the session is not
    /// connected or the write failed; a failed write closes the connection.
    pub async fn send(&self, bytes: &[u8]) -> bool {
        let mut inner = self.shared.inner.lock().await;

        if self.shared.state() != ConnectionState::Connected {
            debug!("Cannot send {} bytes: not connected", bytes.len());
            return false;
        }

        let result = match inner.link.as_mut() {
            Some(link) => self.shared.write(link, bytes).await,
            None => {
                warn!("Connected without a link, dropping {} bytes", bytes.len());
                return false;
            },
        };

        match result {
            Ok(()) => {
                debug!("Sent {} bytes", bytes.len());
                true
            },
            Err(err) => {
                warn!("{}; treating as connection loss", err);
                self.shared.record_failure(&err);
                self.shared.release_link(&mut inner).await;
                self.shared.set_state(ConnectionState::Idle);
                false
            },
        }
    }

    /// Cancels an in-flight connect, closes the connection, and returns to `Idle`.
    pub async fn disconnect(&self) {
        let mut inner = self.shared.inner.lock().await;
        self.shared.tear_down(&mut inner).await;

        if self.shared.state() != ConnectionState::Closed {
            self.shared.set_state(ConnectionState::Idle);
        }
    }

    /// Disconnects and refuses further connects.
    pub async fn shutdown(&self) {
        let mut inner = self.shared.inner.lock().await;
        self.shared.tear_down(&mut inner).await;
        self.shared.set_state(ConnectionState::Closed);
    }
}

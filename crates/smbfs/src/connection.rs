//! Lazy connect, health check and reconnect of one remote share.
//!
//! Callers take short-lived [`ShareLease`]s. A lease is served from the
//! published share while it reports connected; otherwise the caller enters
//! the connect critical section, re-checks, and at most one caller rebuilds
//! the connection/session/share triple. Everyone else waiting on the lock
//! then observes the freshly published share.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::{Result, SmbFsError};
use crate::identity::FsIdentity;
use crate::remote::{DiskShare, RemoteError, RemoteResult, SmbClient, SmbConnection, SmbSession};

/// Lifecycle of a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live share; the next lease connects
    Disconnected,
    /// A caller is establishing the connection
    Connecting,
    /// A live share is published
    Connected,
    /// Closed for good
    Closed,
}

/// One live transport/session/share triple.
struct LiveShare {
    connection: Box<dyn SmbConnection>,
    session: Box<dyn SmbSession>,
    share: Arc<dyn DiskShare>,
}

impl LiveShare {
    fn is_live(&self) -> bool {
        self.connection.is_connected() && self.share.is_connected()
    }

    /// Closes share, session and transport; reports the first failure.
    fn teardown(&self) -> RemoteResult<()> {
        let share = self.share.close();
        let session = self.session.close();
        let connection = self.connection.close();
        share.and(session).and(connection)
    }
}

/// Non-owning handle on the current share. Dropping it never closes anything.
#[derive(Clone)]
pub struct ShareLease {
    live: Arc<LiveShare>,
}

impl ShareLease {
    /// True if both leases point at the same mounted share.
    pub fn same_share(&self, other: &ShareLease) -> bool {
        Arc::ptr_eq(&self.live, &other.live)
    }
}

impl Deref for ShareLease {
    type Target = dyn DiskShare;

    fn deref(&self) -> &Self::Target {
        self.live.share.as_ref()
    }
}

impl fmt::Debug for ShareLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareLease")
            .field("share", &self.live.share.unc_path())
            .finish()
    }
}

/// Owns the connection of one filesystem and hands out leases on its share.
pub struct ConnectionManager {
    identity: Arc<FsIdentity>,
    client: Arc<dyn SmbClient>,
    credentials: Credentials,
    current: RwLock<Option<Arc<LiveShare>>>,
    /// Serializes every (re)connect and the close.
    connect_lock: Mutex<()>,
    /// Written only while `connect_lock` is held; readable at any time.
    state: RwLock<ConnectionState>,
    connects: AtomicU64,
}

impl ConnectionManager {
    /// Creates a disconnected manager; nothing is dialled until the first lease.
    pub fn new(identity: Arc<FsIdentity>, client: Arc<dyn SmbClient>, credentials: Credentials) -> Self {
        debug!(
            target = %identity,
            username = ?credentials.username(),
            "initializing connection manager"
        );
        Self {
            identity,
            client,
            credentials,
            current: RwLock::new(None),
            connect_lock: Mutex::new(()),
            state: RwLock::new(ConnectionState::Disconnected),
            connects: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state; never waits for a connect in progress.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn publish(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Number of completed connect sequences, the first one included.
    pub fn reconnect_count(&self) -> u64 {
        self.connects.load(Ordering::Acquire)
    }

    /// Leases the live share, connecting or reconnecting first if needed.
    pub fn acquire(&self) -> Result<ShareLease> {
        if let Some(live) = self.live_share() {
            return Ok(ShareLease { live });
        }

        let _guard = self.connect_lock.lock();
        if self.state() == ConnectionState::Closed {
            return Err(SmbFsError::closed(format!("connection to {}", self.identity)));
        }
        // Another caller may have reconnected while we waited for the lock.
        if let Some(live) = self.live_share() {
            return Ok(ShareLease { live });
        }

        self.publish(ConnectionState::Connecting);
        if let Some(stale) = self.current.write().take() {
            warn!(target = %self.identity, "share reports not connected, reconnecting");
            if let Err(e) = stale.teardown() {
                debug!(target = %self.identity, error = %e, "discarding stale connection failed");
            }
        }

        match self.establish() {
            Ok(live) => {
                let live = Arc::new(live);
                *self.current.write() = Some(live.clone());
                self.publish(ConnectionState::Connected);
                let connects = self.connects.fetch_add(1, Ordering::AcqRel) + 1;
                info!(
                    target = %self.identity,
                    connects,
                    "connected to share"
                );
                Ok(ShareLease { live })
            }
            Err(source) => {
                self.publish(ConnectionState::Disconnected);
                warn!(target = %self.identity, error = %source, "connecting to share failed");
                Err(SmbFsError::Connection {
                    target: self.identity.to_string(),
                    source,
                })
            }
        }
    }

    fn live_share(&self) -> Option<Arc<LiveShare>> {
        self.current
            .read()
            .as_ref()
            .filter(|live| live.is_live())
            .cloned()
    }

    fn establish(&self) -> std::result::Result<LiveShare, RemoteError> {
        let connection = self
            .client
            .connect(self.identity.host(), self.identity.port())?;
        let session = match connection.authenticate(&self.credentials) {
            Ok(session) => session,
            Err(e) => {
                let _ = connection.close();
                return Err(e);
            }
        };
        let share = match session.mount(self.identity.share()) {
            Ok(share) => share,
            Err(e) => {
                let _ = session.close();
                let _ = connection.close();
                return Err(e);
            }
        };
        Ok(LiveShare {
            connection,
            session,
            share,
        })
    }

    /// Tears the connection down for good. Later calls are no-ops and
    /// `acquire` fails with `Closed` from then on.
    pub fn close(&self) -> Result<()> {
        let _guard = self.connect_lock.lock();
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.publish(ConnectionState::Closed);
        let live = self.current.write().take();
        match live {
            Some(live) => {
                debug!(target = %self.identity, "closing connection");
                live.teardown().map_err(|source| SmbFsError::Connection {
                    target: self.identity.to_string(),
                    source,
                })
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("identity", &self.identity.to_string())
            .field("state", &self.state())
            .field("connects", &self.reconnect_count())
            .finish()
    }
}

//! Routes path operations to the owning filesystem's share.
//!
//! Every remote call goes through here so that the closed check, the share
//! lease and error translation happen in one place.

use std::ops::Deref;

use tracing::{debug, trace, warn};

use crate::connection::ShareLease;
use crate::error::{Result, SmbFsError};
use crate::path::SmbPath;
use crate::remote::{DiskShare, RemoteFile, RemoteResult};

/// Runs `action` against the share of `path` with its share-relative form.
pub(crate) fn call<T, F>(path: &SmbPath, op: &'static str, action: F) -> Result<T>
where
    F: FnOnce(&dyn DiskShare, &str) -> RemoteResult<T>,
{
    let lease = lease_of(path)?;
    let relative = path.share_relative();
    debug!(op, share = %lease.unc_path(), path = %relative, "calling share");
    action(&*lease, &relative).map_err(|e| {
        trace!(op, error = %e, "remote call failed");
        SmbFsError::from_remote(e, path.to_string(), None)
    })
}

/// Two-path variant; both shares stay leased for the whole action.
pub(crate) fn call2<T, F>(path: &SmbPath, other: &SmbPath, op: &'static str, action: F) -> Result<T>
where
    F: FnOnce(&ShareLease, &str, &ShareLease, &str) -> RemoteResult<T>,
{
    let lease = lease_of(path)?;
    let other_lease = lease_of(other)?;
    let relative = path.share_relative();
    let other_relative = other.share_relative();
    debug!(
        op,
        share = %lease.unc_path(),
        path = %relative,
        other_share = %other_lease.unc_path(),
        other_path = %other_relative,
        "calling shares"
    );
    action(&lease, &relative, &other_lease, &other_relative).map_err(|e| {
        trace!(op, error = %e, "remote call failed");
        SmbFsError::from_remote(e, path.to_string(), Some(other.to_string()))
    })
}

fn lease_of(path: &SmbPath) -> Result<ShareLease> {
    let fs = path.file_system()?;
    fs.ensure_open()?;
    fs.connection().acquire()
}

/// Remote handle that is closed when dropped.
///
/// Use [`FileGuard::finish`] where a close failure must reach the caller;
/// a plain drop only logs it.
pub(crate) struct FileGuard {
    file: Box<dyn RemoteFile>,
    closed: bool,
}

impl FileGuard {
    pub(crate) fn new(file: Box<dyn RemoteFile>) -> Self {
        Self { file, closed: false }
    }

    pub(crate) fn finish(mut self) -> RemoteResult<()> {
        self.closed = true;
        self.file.close()
    }
}

impl Deref for FileGuard {
    type Target = dyn RemoteFile;

    fn deref(&self) -> &Self::Target {
        self.file.as_ref()
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.file.close() {
                warn!(error = %e, "closing remote handle failed");
            }
        }
    }
}

//! Snapshot listing of one remote directory.

use std::fmt;
use std::vec;

use parking_lot::Mutex;

use crate::dispatch;
use crate::error::{Result, SmbFsError};
use crate::path::SmbPath;

const CURRENT: &str = ".";
const PARENT: &str = "..";

enum Listing {
    Ready(Vec<SmbPath>),
    Taken,
    Closed,
}

/// Children of a directory, fetched once when the stream is opened.
///
/// The content can be iterated exactly once. A second call to
/// [`DirectoryStream::entries`], or one after [`DirectoryStream::close`],
/// fails with `IllegalState`.
pub struct DirectoryStream {
    dir: SmbPath,
    listing: Mutex<Listing>,
}

impl DirectoryStream {
    /// Lists every child of `dir`.
    pub fn open(dir: &SmbPath) -> Result<Self> {
        Self::open_filtered(dir, |_| true)
    }

    /// Lists `dir` and keeps the children accepted by `filter`.
    pub fn open_filtered<F>(dir: &SmbPath, filter: F) -> Result<Self>
    where
        F: Fn(&SmbPath) -> bool,
    {
        let entries = dispatch::call(dir, "list", |share, relative| share.list(relative))?;
        let children = entries
            .into_iter()
            .filter(|entry| entry.file_name != CURRENT && entry.file_name != PARENT)
            .map(|entry| dir.child(&entry.file_name))
            .filter(|child| filter(child))
            .collect();
        Ok(Self {
            dir: dir.clone(),
            listing: Mutex::new(Listing::Ready(children)),
        })
    }

    /// The listed directory.
    pub fn dir(&self) -> &SmbPath {
        &self.dir
    }

    /// Hands out the listed children. Works once.
    pub fn entries(&self) -> Result<vec::IntoIter<SmbPath>> {
        let mut listing = self.listing.lock();
        match std::mem::replace(&mut *listing, Listing::Taken) {
            Listing::Ready(children) => Ok(children.into_iter()),
            Listing::Taken => Err(SmbFsError::IllegalState {
                msg: format!("the listing of {} was already iterated", self.dir),
            }),
            Listing::Closed => {
                *listing = Listing::Closed;
                Err(SmbFsError::IllegalState {
                    msg: format!("the listing of {} is closed", self.dir),
                })
            }
        }
    }

    /// True until the entries are taken or the stream is closed.
    pub fn is_open(&self) -> bool {
        matches!(*self.listing.lock(), Listing::Ready(_))
    }

    /// Drops the listing; later calls to `entries` fail.
    pub fn close(&self) {
        *self.listing.lock() = Listing::Closed;
    }
}

impl fmt::Debug for DirectoryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryStream")
            .field("dir", &self.dir)
            .field("open", &self.is_open())
            .finish()
    }
}

//! Canonical identity of one remote filesystem: scheme, authority and share.

use std::fmt;

use url::Url;

use crate::codec;
use crate::error::{Result, SmbFsError};

/// Address scheme of every filesystem.
pub const SMB_SCHEME: &str = "smb";

/// User-info embedded in an address.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserInfo {
    /// Decoded username
    pub username: String,
    /// Decoded password, if the address carries one
    pub password: Option<String>,
}

impl fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserInfo")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Registry key naming exactly one remote filesystem.
///
/// Scheme and host compare case-insensitively; the share name and
/// user-info compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FsIdentity {
    scheme: String,
    user_info: Option<UserInfo>,
    host: String,
    port: Option<u16>,
    share: String,
}

impl FsIdentity {
    /// Identity of `share` on `host`, without user-info. The host is lowercased.
    pub fn new(host: &str, port: Option<u16>, share: &str) -> Result<Self> {
        if host.is_empty() {
            return Err(SmbFsError::invalid("the address has no host"));
        }
        if share.is_empty() || share.contains('/') {
            return Err(SmbFsError::invalid(format!("invalid share name '{}'", share)));
        }
        Ok(Self {
            scheme: SMB_SCHEME.to_string(),
            user_info: None,
            host: host.to_ascii_lowercase(),
            port,
            share: share.to_string(),
        })
    }

    /// Replaces the user-info.
    pub fn with_user_info(mut self, user_info: Option<UserInfo>) -> Self {
        self.user_info = user_info;
        self
    }

    /// Parses `smb://[user[:password]@]host[:port]/share[/path...]`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        Ok(Self::split_uri(uri)?.0)
    }

    /// Parses an address into its identity and the percent-encoded path
    /// that follows the share segment (empty when absent).
    pub(crate) fn split_uri(uri: &str) -> Result<(Self, String)> {
        let url = Url::parse(uri)
            .map_err(|e| SmbFsError::invalid(format!("invalid address '{}': {}", uri, e)))?;
        if !url.scheme().eq_ignore_ascii_case(SMB_SCHEME) {
            return Err(SmbFsError::invalid(format!(
                "the address '{}' does not point to an SMB resource",
                uri
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| SmbFsError::invalid(format!("the address '{}' has no authority", uri)))?;

        let path = url.path();
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (share, rest) = match trimmed.find('/') {
            Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
            None => (trimmed, ""),
        };
        if share.is_empty() {
            return Err(SmbFsError::invalid(format!(
                "the address '{}' names no share",
                uri
            )));
        }

        let user_info = if url.username().is_empty() {
            None
        } else {
            Some(UserInfo {
                username: codec::decode_uri_component(url.username())?,
                password: url.password().map(codec::decode_uri_component).transpose()?,
            })
        };

        let identity = Self::new(host, url.port(), &codec::decode_uri_component(share)?)?
            .with_user_info(user_info);
        Ok((identity, rest.to_string()))
    }

    /// Always `smb`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Lowercased host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Share name.
    pub fn share(&self) -> &str {
        &self.share
    }

    /// User-info taken from the address.
    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    /// `host[:port]`
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// `\\host\share`
    pub fn unc_path(&self) -> String {
        format!("\\\\{}\\{}", self.host, self.share)
    }
}

/// Renders `scheme://[user@]host[:port]/share`; passwords are never rendered.
impl fmt::Display for FsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(user) = &self.user_info {
            write!(f, "{}@", codec::encode_component(&user.username))?;
        }
        write!(
            f,
            "{}/{}",
            self.authority(),
            codec::encode_component(&self.share)
        )
    }
}

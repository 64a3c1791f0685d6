//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use smbfs::testing::MemoryServer;
use smbfs::{FileSystemRegistry, SmbFsConfig, SmbPath};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory server and a registry talking to it.
pub struct Fixture {
    pub server: MemoryServer,
    pub registry: FileSystemRegistry,
}

impl Fixture {
    pub fn new(shares: &[&str]) -> Self {
        init_tracing();
        let server = MemoryServer::with_shares(shares);
        let registry = FileSystemRegistry::new(Arc::new(server.clone()), SmbFsConfig::default());
        Self { server, registry }
    }

    pub fn path(&self, uri: &str) -> SmbPath {
        self.registry.get_path(uri).unwrap()
    }
}

/// Deterministic, non-repeating test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use stash_object_store::ObjectStoreConfig;

use crate::collector::CollectorConfig;

#[derive(Debug, Clone)]
pub struct Config {
    // http server configuration
    /// address for the API server to listen on.
    ///  if not set then 0.0.0.0:3333 will be used
    pub listen_addr: SocketAddr,
    /// trace every request through the HTTP server
    pub log_requests: bool,

    // data store configuration
    /// a path to a sqlite database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,
    /// where blob payloads are kept
    pub storage: ObjectStoreConfig,

    // background work
    pub collector: CollectorConfig,

    // misc
    pub log_level: tracing::Level,
    /// when set, logs are also written to a daily rolling
    ///  file in this directory
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 3333),
            log_requests: true,
            sqlite_path: None,
            storage: ObjectStoreConfig::Memory,
            collector: CollectorConfig::default(),
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }
}

use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    // Listen address
    pub listen_addr: SocketAddr,
    // log level for http tracing
    pub log_level: tracing::Level,
    // trace every request
    pub log_requests: bool,
}

impl Config {
    pub fn new(listen_addr: SocketAddr, log_requests: bool) -> Self {
        tracing::info!(
            "Creating HTTP server Config: listen_addr={}, log_requests={}",
            listen_addr,
            log_requests
        );
        Self {
            listen_addr,
            log_level: tracing::Level::INFO,
            log_requests,
        }
    }
}

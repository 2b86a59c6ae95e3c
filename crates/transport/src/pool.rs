//! Idle outbound connections, keyed by remote host.
//!
//! A stream is checked out for exactly one request and response. Only a stream that
//! completed its call cleanly is handed back, so a pooled stream never holds half a frame.

use dashmap::DashMap;
use tokio::net::TcpStream;

/// Pool of idle streams per `host:port`.
pub struct ConnectionPool {
    idle: DashMap<String, Vec<TcpStream>>,
    max_idle: usize,
}

impl ConnectionPool {
    /// Keep at most `max_idle` streams per host.
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: DashMap::new(),
            max_idle,
        }
    }

    /// Take an idle stream to `host`, if any.
    pub fn take(&self, host: &str) -> Option<TcpStream> {
        self.idle.get_mut(host).and_then(|mut streams| streams.pop())
    }

    /// Return a stream after a successful call. Dropped when the host is already full.
    pub fn put(&self, host: &str, stream: TcpStream) {
        let mut streams = self.idle.entry(host.to_string()).or_default();
        if streams.len() < self.max_idle {
            streams.push(stream);
        }
    }

    /// Close every idle stream to `host`.
    pub fn evict(&self, host: &str) {
        self.idle.remove(host);
    }

    /// Number of idle streams to `host`.
    pub fn idle(&self, host: &str) -> usize {
        self.idle.get(host).map(|s| s.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.idle.clear();
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection configuration.
//!
//! # Example
//!
//! ```
//! use rop::ConnectionConfig;
//! use std::time::Duration;
//!
//! let config = ConnectionConfig {
//!     poll_interval: Duration::from_millis(20),
//!     ..Default::default()
//! }
//! .with_send_buffer_size(4096);
//! assert!(config.validate().is_ok());
//! ```

use crate::frame::Limits;
use std::time::Duration;

/// Smallest accepted send buffer. Encoding is resumable, so any size works,
/// but very small buffers only add syscalls.
pub const MIN_SEND_BUFFER: usize = 16;

/// Who runs requests no calling thread is waiting to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Runtime {
    /// The connection's driver thread polls the stream and runs them
    #[default]
    Driver,
    /// A reader thread drains the stream; each busy peer port gets its
    /// own thread
    ThreadPerPort,
}

impl Runtime {
    /// Parse `driver` or `thread-per-port`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "driver" | "socket" => Some(Self::Driver),
            "thread-per-port" | "stream" => Some(Self::ThreadPerPort),
            _ => None,
        }
    }
}

/// Connection configuration.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    // === Buffers ===
    /// Capacity of the outbound encode buffer. Messages larger than this are
    /// encoded across several writes.
    pub send_buffer_size: usize,

    /// Bytes requested per socket read
    pub recv_chunk_size: usize,

    /// SO_SNDBUF socket option (0 = OS default)
    pub socket_send_buffer: usize,

    /// SO_RCVBUF socket option (0 = OS default)
    pub socket_recv_buffer: usize,

    // === Limits ===
    /// Maximum length of a decoded string or byte blob (anti-OOM protection)
    pub max_blob_len: u32,

    /// Maximum element count of a decoded list
    pub max_list_len: u32,

    // === Scheduling ===
    /// Upper bound on one readiness or condition wait. Shutdown is noticed
    /// within this interval.
    pub poll_interval: Duration,

    /// Enable TCP_NODELAY on TCP streams
    pub nodelay: bool,

    /// Name given to the driver thread
    pub driver_thread_name: String,

    /// Threading model of the connection
    pub runtime: Runtime,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_buffer_size: 64 * 1024, // 64 KB
            recv_chunk_size: 16 * 1024,  // 16 KB
            socket_send_buffer: 0,       // OS default
            socket_recv_buffer: 0,       // OS default

            max_blob_len: 16 * 1024 * 1024, // 16 MB
            max_list_len: 1 << 20,

            poll_interval: Duration::from_millis(100),
            nodelay: true,
            driver_thread_name: "rop-driver".to_string(),
            runtime: Runtime::Driver,
        }
    }
}

impl ConnectionConfig {
    /// Short poll interval for interactive workloads.
    pub fn low_latency() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    /// Tiny buffers: every message is split across many reads and writes.
    pub fn constrained() -> Self {
        Self {
            send_buffer_size: MIN_SEND_BUFFER,
            recv_chunk_size: 7,
            ..Default::default()
        }
    }

    /// Overlay `ROP_*` environment variables on the defaults.
    ///
    /// Recognized: `ROP_SEND_BUFFER_SIZE`, `ROP_RECV_CHUNK_SIZE`,
    /// `ROP_MAX_BLOB_LEN`, `ROP_POLL_INTERVAL_MS`, `ROP_RUNTIME`.
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_number("ROP_SEND_BUFFER_SIZE") {
            config.send_buffer_size = usize::try_from(v).unwrap_or(usize::MAX);
        }
        if let Some(v) = env_number("ROP_RECV_CHUNK_SIZE") {
            config.recv_chunk_size = usize::try_from(v).unwrap_or(usize::MAX);
        }
        if let Some(v) = env_number("ROP_MAX_BLOB_LEN") {
            config.max_blob_len = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = env_number("ROP_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(v);
        }
        if let Ok(raw) = std::env::var("ROP_RUNTIME") {
            match Runtime::parse(&raw) {
                Some(runtime) => config.runtime = runtime,
                None => log::warn!("rop config: ignoring ROP_RUNTIME={:?}", raw),
            }
        }
        config
    }

    /// Builder: set send buffer size
    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = size;
        self
    }

    /// Builder: set receive chunk size
    pub fn with_recv_chunk_size(mut self, size: usize) -> Self {
        self.recv_chunk_size = size;
        self
    }

    /// Builder: set max blob length
    pub fn with_max_blob_len(mut self, len: u32) -> Self {
        self.max_blob_len = len;
        self
    }

    /// Builder: set max list length
    pub fn with_max_list_len(mut self, len: u32) -> Self {
        self.max_list_len = len;
        self
    }

    /// Builder: set poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder: set TCP_NODELAY
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Builder: set SO_SNDBUF / SO_RCVBUF (0 = OS default)
    pub fn with_socket_buffers(mut self, send: usize, recv: usize) -> Self {
        self.socket_send_buffer = send;
        self.socket_recv_buffer = recv;
        self
    }

    /// Builder: set driver thread name
    pub fn with_driver_thread_name(mut self, name: impl Into<String>) -> Self {
        self.driver_thread_name = name.into();
        self
    }

    /// Builder: set threading model
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Decoder limits derived from this configuration.
    pub fn limits(&self) -> Limits {
        Limits {
            max_blob_len: self.max_blob_len,
            max_list_len: self.max_list_len,
        }
    }

    /// Validate configuration, returning error message if invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.send_buffer_size < MIN_SEND_BUFFER {
            return Err("send_buffer_size must be >= 16");
        }
        if self.recv_chunk_size == 0 {
            return Err("recv_chunk_size must be > 0");
        }
        if self.max_blob_len == 0 {
            return Err("max_blob_len must be > 0");
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be > 0");
        }
        if self.poll_interval > Duration::from_secs(10) {
            return Err("poll_interval too large (> 10 s)");
        }
        if self.driver_thread_name.is_empty() {
            return Err("driver_thread_name must not be empty");
        }
        Ok(())
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("rop config: ignoring {}={:?} (not a number)", key, raw);
            None
        }
    }
}

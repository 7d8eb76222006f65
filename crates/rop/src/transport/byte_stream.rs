// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte streams a connection can run over.
//!
//! Streams are shared between the driver and calling threads, so every
//! operation takes `&self`; mio streams allow concurrent reads and writes
//! through shared references. Streams must be in non-blocking mode.

use std::io::{self, Read, Write};
use std::net::Shutdown;

/// Non-blocking, pollable, full-duplex byte stream.
pub trait ByteStream: mio::event::Source + Send + Sync {
    /// Read what is available. `WouldBlock` when nothing is.
    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write what fits. `WouldBlock` when nothing does.
    fn write_some(&self, buf: &[u8]) -> io::Result<usize>;

    /// Close both directions.
    fn shutdown(&self) -> io::Result<()>;

    /// Peer description for logs.
    fn peer_label(&self) -> String;
}

impl ByteStream for mio::net::TcpStream {
    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.read(buf)
    }

    fn write_some(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.write(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, Shutdown::Both)
    }

    fn peer_label(&self) -> String {
        self.peer_addr()
            .map(|addr| format!("tcp:{}", addr))
            .unwrap_or_else(|_| "tcp:?".to_string())
    }
}

#[cfg(unix)]
impl ByteStream for mio::net::UnixStream {
    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.read(buf)
    }

    fn write_some(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.write(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        mio::net::UnixStream::shutdown(self, Shutdown::Both)
    }

    fn peer_label(&self) -> String {
        "unix".to_string()
    }
}

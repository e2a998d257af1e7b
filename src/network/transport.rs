//! TCP Transport
//!
//! One TCP stream per channel. A reader thread forwards everything it reads
//! into the session's event queue; writes happen on the caller's thread.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::Sender;

use crate::error::{ClientError, Result};
use crate::session::Channel;

/// What a reader thread observed
#[derive(Debug)]
pub enum TransportEventKind {
    Data(Bytes),
    /// Orderly end of stream
    Closed,
    Failed(std::io::Error),
}

#[derive(Debug)]
pub struct TransportEvent {
    pub channel: Channel,

    /// Incremented for every side channel opened, so events from a
    /// previous side connection can be told apart
    pub generation: u64,

    pub kind: TransportEventKind,
}

/// A connected stream plus the thread reading from it
pub struct TcpTransport {
    stream: TcpStream,
    peer_addr: String,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Connect and start the reader thread
    pub fn connect(
        host: &str,
        port: u16,
        timeout_ms: u64,
        chunk_size: usize,
        channel: Channel,
        generation: u64,
        events: Sender<TransportEvent>,
    ) -> Result<Self> {
        let stream = open_stream(host, port, timeout_ms)?;

        // Disable Nagle's algorithm; requests are small and latency bound
        stream.set_nodelay(true)?;

        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| format!("{}:{}", host, port));

        let read_stream = stream.try_clone()?;
        let reader = thread::Builder::new()
            .name(format!("basex-{:?}-reader", channel).to_lowercase())
            .spawn(move || read_loop(read_stream, chunk_size, channel, generation, events))?;

        tracing::debug!("Connected {:?} channel to {}", channel, peer_addr);

        Ok(Self {
            stream,
            peer_addr,
            reader: Some(reader),
        })
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Shut the stream down; the reader thread reports `Closed` and exits.
    pub fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != ErrorKind::NotConnected {
                tracing::debug!("Shutdown of {} failed: {}", self.peer_addr, e);
            }
        }
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn open_stream(host: &str, port: u16, timeout_ms: u64) -> Result<TcpStream> {
    if timeout_ms == 0 {
        return Ok(TcpStream::connect((host, port))?);
    }

    let timeout = Duration::from_millis(timeout_ms);
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => ClientError::Io(e),
        None => ClientError::Transport(format!("no address for {}:{}", host, port)),
    })
}

fn read_loop(
    mut stream: TcpStream,
    chunk_size: usize,
    channel: Channel,
    generation: u64,
    events: Sender<TransportEvent>,
) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        let kind = match stream.read(&mut buf) {
            Ok(0) => TransportEventKind::Closed,
            Ok(n) => TransportEventKind::Data(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                ) =>
            {
                tracing::debug!("{:?} channel reset by peer", channel);
                TransportEventKind::Closed
            }
            Err(e) => TransportEventKind::Failed(e),
        };

        let last = !matches!(kind, TransportEventKind::Data(_));
        let event = TransportEvent {
            channel,
            generation,
            kind,
        };
        // The session is gone once the receiver is dropped
        if events.send(event).is_err() || last {
            break;
        }
    }
}

//! Display server sinks.
//!
//! Height updates are serialized as `{"event":"height_update","payload":"75.3"}`
//! and written one per line, either to stdout or to a TCP peer.
//!
//! The TCP sink uses blocking sockets on the executor thread. Connect and
//! each write are bounded by [`IO_TIMEOUT`], which is the longest a slow
//! display server can hold up the control loop.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use desk_core::control::{DisplayLink, HeightUpdate};
use desk_core::link::{LinkControl, LinkError, LinkErrorKind, LinkKind};
use portable_atomic::{AtomicBool, Ordering};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Upper bound on a blocking connect or write.
pub const IO_TIMEOUT: Duration = Duration::from_millis(250);

/// Makes the next publish fail, as if the server hung up.
static FAULT_PENDING: AtomicBool = AtomicBool::new(false);

pub fn inject_fault() {
    FAULT_PENDING.store(true, Ordering::Relaxed);
}

/// Wire form of a display message.
#[derive(Debug, Serialize)]
pub struct DisplayMessage<'a> {
    pub event: &'a str,
    pub payload: &'a str,
}

pub fn encode(update: &HeightUpdate) -> Result<String, serde_json::Error> {
    let payload = update.payload();
    serde_json::to_string(&DisplayMessage {
        event: HeightUpdate::EVENT,
        payload: payload.as_str(),
    })
}

enum Target {
    Stdout,
    Tcp {
        address: String,
        stream: Option<TcpStream>,
    },
}

/// Display link backed by stdout or a TCP connection.
pub struct DisplaySink {
    target: Target,
    connected: bool,
}

impl DisplaySink {
    /// `stdout` selects the console; anything else is treated as `host:port`.
    pub fn new(address: &str) -> Self {
        let target = if address.eq_ignore_ascii_case("stdout") {
            Target::Stdout
        } else {
            Target::Tcp {
                address: address.to_owned(),
                stream: None,
            }
        };
        Self {
            target,
            connected: false,
        }
    }

    fn error(kind: LinkErrorKind) -> LinkError {
        LinkError::new(LinkKind::Display, kind)
    }
}

fn resolve(address: &str) -> Result<SocketAddr, LinkError> {
    address
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| DisplaySink::error(LinkErrorKind::Rejected))
}

fn io_error(err: &io::Error) -> LinkError {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkErrorKind::Timeout,
        io::ErrorKind::ConnectionRefused => LinkErrorKind::Rejected,
        io::ErrorKind::NotConnected => LinkErrorKind::NotConnected,
        _ => LinkErrorKind::Io,
    };
    DisplaySink::error(kind)
}

impl LinkControl for DisplaySink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        if let Target::Tcp { address, stream } = &mut self.target {
            let socket = resolve(address)?;
            let connection = TcpStream::connect_timeout(&socket, IO_TIMEOUT).map_err(|err| {
                warn!(%address, %err, "display connect failed");
                io_error(&err)
            })?;
            connection
                .set_write_timeout(Some(IO_TIMEOUT))
                .map_err(|err| io_error(&err))?;
            *stream = Some(connection);
        }
        FAULT_PENDING.store(false, Ordering::Relaxed);
        self.connected = true;
        info!("display link up");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let stream = match &mut self.target {
            Target::Tcp { stream, .. } => stream.take(),
            Target::Stdout => None,
        };
        if let Some(stream) = stream {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        let was_connected = std::mem::replace(&mut self.connected, false);
        if was_connected {
            Ok(())
        } else {
            Err(Self::error(LinkErrorKind::NotConnected))
        }
    }
}

impl DisplayLink for DisplaySink {
    async fn publish(&mut self, update: &HeightUpdate) -> Result<(), LinkError> {
        if !self.connected {
            return Err(Self::error(LinkErrorKind::NotConnected));
        }
        if FAULT_PENDING.swap(false, Ordering::Relaxed) {
            self.connected = false;
            return Err(Self::error(LinkErrorKind::Io));
        }

        let line = encode(update).map_err(|_| Self::error(LinkErrorKind::Rejected))?;
        match &mut self.target {
            Target::Stdout => println!("{line}"),
            Target::Tcp { stream, .. } => {
                let stream = stream
                    .as_mut()
                    .ok_or_else(|| Self::error(LinkErrorKind::NotConnected))?;
                writeln!(stream, "{line}").map_err(|err| {
                    self.connected = false;
                    io_error(&err)
                })?;
            }
        }
        debug!(payload = %update.payload(), "height published");
        Ok(())
    }
}

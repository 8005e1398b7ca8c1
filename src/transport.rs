use crate::message::Message;
use anyhow::{Context, Result};
use log::debug;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Maximum datagram size.
const MAX_DATAGRAM: usize = 65_535;

/// How long a single `recv_from` call may block while polling for
/// readability. Small enough that the driver loop's non-blocking drain
/// never stalls past one tick; a short blocking read rather than a busy
/// spin.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// The narrow interface the core consumes the datagram transport through.
/// A real `UdpTransport` talks to a broker process; tests may substitute
/// anything that implements this.
pub trait Transport {
    fn send(&mut self, msg: &Message) -> Result<()>;

    /// Pop one ready datagram, if any, without blocking past `POLL_TIMEOUT`.
    /// Returns `Ok(None)` on timeout or a malformed/undecodable datagram
    /// Malformed or undecodable datagrams are dropped silently, not an
    /// error.
    fn try_recv(&mut self) -> Result<Option<Message>>;
}

/// A UDP-backed transport: an ephemeral local endpoint that sends every
/// outbound message to a single well-known broker address, which forwards
/// by the message's `dst` field.
pub struct UdpTransport {
    socket: UdpSocket,
    broker_addr: SocketAddr,
}

impl UdpTransport {
    pub fn bind(broker_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").context("binding ephemeral UDP endpoint")?;
        socket
            .set_read_timeout(Some(POLL_TIMEOUT))
            .context("setting socket poll timeout")?;
        Ok(UdpTransport { socket, broker_addr })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, msg: &Message) -> Result<()> {
        let bytes = serde_json::to_vec(msg).context("encoding outbound message")?;
        if bytes.len() > MAX_DATAGRAM {
            anyhow::bail!("outbound message ({} bytes) exceeds datagram limit", bytes.len());
        }
        self.socket.send_to(&bytes, self.broker_addr)?;
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Message>> {
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _from)) => match serde_json::from_slice::<Message>(&buf[..len]) {
                Ok(msg) => Ok(Some(msg)),
                Err(e) => {
                    debug!("dropping undecodable datagram ({} bytes): {}", len, e);
                    Ok(None)
                }
            },
            Err(e) if would_block(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn would_block(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

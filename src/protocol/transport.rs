use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use thiserror::Error;

use super::command::{Command, ProtocolError, MAX_DATAGRAM};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot resolve {target}: {source}")]
    Resolve { target: String, source: io::Error },
    #[error("{0} did not resolve to any address")]
    NoAddress(String),
    #[error("failed to bind local UDP socket: {0}")]
    Bind(io::Error),
    #[error("send failed: {0}")]
    Send(io::Error),
    #[error("short send: {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },
    #[error("receive failed: {0}")]
    Receive(io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Fire-and-forget datagram sink. No acknowledgement, no retransmission.
pub trait Transport: Send {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError>;

    fn send_command(&mut self, command: &Command) -> Result<(), TransportError> {
        let datagram = command.encode()?;
        self.send(&datagram)
    }
}

/// UDP socket bound to an ephemeral local port. The socket is closed when
/// the transport is dropped.
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let label = format!("{}:{}", host, port);
        let target = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                target: label.clone(),
                source,
            })?
            .next()
            .ok_or(TransportError::NoAddress(label))?;

        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(TransportError::Bind)?;
        log::debug!("UDP transport {} -> {}", socket.local_addr().map_err(TransportError::Bind)?, target);

        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Sends a query command and waits for one reply datagram of at most
    /// 512 bytes.
    pub fn query(&mut self, command: &Command, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.send_command(command)?;
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(TransportError::Receive)?;

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) if from.ip() == self.target.ip() => return Ok(buf[..len].to_vec()),
                Ok((_, from)) => log::debug!("Ignoring datagram from {}", from),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(TransportError::Timeout(timeout));
                }
                Err(e) => return Err(TransportError::Receive(e)),
            }
        }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        let sent = self
            .socket
            .send_to(datagram, self.target)
            .map_err(TransportError::Send)?;
        if sent != datagram.len() {
            return Err(TransportError::ShortSend {
                sent,
                len: datagram.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::Rgb;

    fn receiver() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    #[test]
    fn sends_encoded_commands() {
        let (rx, port) = receiver();
        let mut transport = UdpTransport::connect("127.0.0.1", port).unwrap();
        transport
            .send_command(&Command::FillColor(Rgb::new(255, 215, 0)))
            .unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[3, 255, 215, 0]);
    }

    #[test]
    fn query_returns_reply_bytes() {
        let (rx, port) = receiver();
        let mut transport = UdpTransport::connect("127.0.0.1", port).unwrap();

        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM];
            let (len, from) = rx.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..len], &[253]);
            rx.send_to(b"Power on", from).unwrap();
        });

        let reply = transport
            .query(&Command::ResetInfo, Duration::from_secs(2))
            .unwrap();
        responder.join().unwrap();
        assert_eq!(reply, b"Power on".to_vec());
    }

    #[test]
    fn query_times_out_without_reply() {
        let (_rx, port) = receiver();
        let mut transport = UdpTransport::connect("127.0.0.1", port).unwrap();
        let err = transport
            .query(&Command::Readback, Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[test]
    fn encoding_errors_surface_before_sending() {
        let (_rx, port) = receiver();
        let mut transport = UdpTransport::connect("127.0.0.1", port).unwrap();
        let err = transport
            .send_command(&Command::FillPattern(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, TransportError::Protocol(ProtocolError::EmptyPattern)));
    }
}

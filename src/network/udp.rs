//! Low-level UDP socket handling
//!
//! Each session owns two datagram endpoints (data and control). Sockets are
//! configured through socket2 before binding, then used as blocking std
//! sockets with a read timeout so receive loops can observe shutdown.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Create a configured UDP socket bound to `addr`
pub fn create_socket(addr: SocketAddr, config: &NetworkConfig) -> Result<StdUdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    configure_socket(&socket, config)?;

    socket.bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    let std_socket: StdUdpSocket = socket.into();
    std_socket.set_read_timeout(Some(config.read_timeout()))
        .map_err(|e| NetworkError::BindFailed(format!("Failed to set read timeout: {}", e)))?;
    std_socket.set_write_timeout(Some(config.write_timeout()))
        .map_err(|e| NetworkError::BindFailed(format!("Failed to set write timeout: {}", e)))?;

    Ok(std_socket)
}

fn configure_socket(socket: &Socket, config: &NetworkConfig) -> Result<(), NetworkError> {
    if config.reuse_addr {
        socket.set_reuse_address(true)
            .map_err(|e| NetworkError::BindFailed(format!("Failed to set SO_REUSEADDR: {}", e)))?;
    }

    socket.set_send_buffer_size(config.send_buffer_size)
        .map_err(|e| NetworkError::BindFailed(format!("Failed to set send buffer: {}", e)))?;

    socket.set_recv_buffer_size(config.recv_buffer_size)
        .map_err(|e| NetworkError::BindFailed(format!("Failed to set recv buffer: {}", e)))?;

    Ok(())
}

/// One bound datagram endpoint, shared between the sending caller and a receive loop
#[derive(Debug)]
pub struct UdpChannel {
    socket: StdUdpSocket,
    local_addr: SocketAddr,
    datagram_buffer_len: usize,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
}

impl UdpChannel {
    /// Bind a channel on `addr`. Port 0 picks an ephemeral port.
    pub fn bind(addr: SocketAddr, config: &NetworkConfig) -> Result<Self, NetworkError> {
        let socket = create_socket(addr, config)?;
        let local_addr = socket.local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        Ok(Self {
            socket,
            local_addr,
            datagram_buffer_len: config.datagram_buffer_len,
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive buffer size a loop should allocate
    pub fn datagram_buffer_len(&self) -> usize {
        self.datagram_buffer_len
    }

    /// Send one datagram to `target`
    pub fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize, NetworkError> {
        let sent = self.socket.send_to(data, target)
            .map_err(|e| NetworkError::SendFailed(format!("{}: {}", target, e)))?;
        if sent != data.len() {
            return Err(NetworkError::SendFailed(format!(
                "{}: short write ({} of {} bytes)",
                target,
                sent,
                data.len()
            )));
        }
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
        Ok(sent)
    }

    /// Receive one datagram, waiting at most the configured read timeout.
    ///
    /// Returns `Ok(None)` when the timeout expires without traffic.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((size, addr)) => {
                self.packets_received.fetch_add(1, Ordering::Relaxed);
                self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
                Ok(Some((size, addr)))
            }
            Err(ref e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get statistics
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            local_addr: self.local_addr,
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Transport counters of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub local_addr: SocketAddr,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
}

/// Errors a receive loop survives: interrupted calls and ICMP feedback from
/// earlier sends to a closed port
pub fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn test_config() -> NetworkConfig {
        NetworkConfig {
            read_timeout_ms: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_socket_creation() {
        let socket = create_socket(loopback(), &test_config());
        assert!(socket.is_ok());
        assert_ne!(socket.unwrap().local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_bind_conflict() {
        let first = UdpChannel::bind(loopback(), &test_config()).unwrap();
        let second = UdpChannel::bind(first.local_addr(), &test_config());
        assert!(matches!(second, Err(NetworkError::BindFailed(_))));
    }

    #[test]
    fn test_send_and_receive() {
        let a = UdpChannel::bind(loopback(), &test_config()).unwrap();
        let b = UdpChannel::bind(loopback(), &test_config()).unwrap();

        assert_eq!(a.send_to(&[1, 2, 3], b.local_addr()).unwrap(), 3);

        let mut buf = vec![0u8; b.datagram_buffer_len()];
        let mut received = None;
        for _ in 0..50 {
            if let Some(datagram) = b.recv_from(&mut buf).unwrap() {
                received = Some(datagram);
                break;
            }
        }
        let (size, source) = received.expect("datagram not received");
        assert_eq!(&buf[..size], &[1, 2, 3]);
        assert_eq!(source, a.local_addr());

        assert_eq!(a.stats().packets_sent, 1);
        assert_eq!(a.stats().bytes_sent, 3);
        assert_eq!(b.stats().packets_received, 1);
    }

    #[test]
    fn test_receive_timeout() {
        let channel = UdpChannel::bind(loopback(), &test_config()).unwrap();
        let mut buf = [0u8; 64];

        let started = std::time::Instant::now();
        assert!(channel.recv_from(&mut buf).unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

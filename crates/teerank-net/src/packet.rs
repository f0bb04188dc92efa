//! Connectionless UDP transport: the 6-byte header every packet on the
//! wire carries, and the dual IPv4/IPv6 socket pair used to send and
//! receive them.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::PacketError;

pub const CONNLESS_HEADER: [u8; 6] = [b'x', b'e', 0xff, 0xff, 0xff, 0xff];
pub const CONNLESS_PACKET_SIZE: usize = 1400;
pub const PACKET_SIZE: usize = CONNLESS_PACKET_SIZE - CONNLESS_HEADER.len();

/// Total budget for one [`Transport::recv`] call, split between the two
/// address families so neither starves the other.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Transport {
    v4: UdpSocket,
    v6: UdpSocket,
    /// Which socket to check first; flipped every call so a burst of
    /// traffic on one family can't starve the other.
    next_first: bool,
}

impl Transport {
    pub fn bind() -> Result<Self, PacketError> {
        let v4 = UdpSocket::bind("0.0.0.0:0")?;
        let v6 = UdpSocket::bind("[::]:0")?;
        v4.set_read_timeout(Some(RECV_TIMEOUT / 2))?;
        v6.set_read_timeout(Some(RECV_TIMEOUT / 2))?;
        Ok(Transport {
            v4,
            v6,
            next_first: false,
        })
    }

    pub fn send(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), PacketError> {
        if CONNLESS_HEADER.len() + payload.len() > CONNLESS_PACKET_SIZE {
            return Err(PacketError::TooLarge);
        }
        let mut buf = Vec::with_capacity(CONNLESS_HEADER.len() + payload.len());
        buf.extend_from_slice(&CONNLESS_HEADER);
        buf.extend_from_slice(payload);

        let sock = if addr.is_ipv4() { &self.v4 } else { &self.v6 };
        sock.send_to(&buf, addr)?;
        Ok(())
    }

    /// Waits up to ~1s across both sockets for a connless packet,
    /// returning its sender and payload (header already stripped).
    /// Returns `Ok(None)` on timeout, which is the common case and not
    /// an error.
    pub fn recv(&mut self) -> Result<Option<(SocketAddr, Vec<u8>)>, PacketError> {
        self.next_first = !self.next_first;
        let (first, second) = if self.next_first {
            (&self.v4, &self.v6)
        } else {
            (&self.v6, &self.v4)
        };

        if let Some(r) = try_recv(first)? {
            return Ok(Some(r));
        }
        if let Some(r) = try_recv(second)? {
            return Ok(Some(r));
        }
        Ok(None)
    }
}

fn try_recv(sock: &UdpSocket) -> Result<Option<(SocketAddr, Vec<u8>)>, PacketError> {
    let mut buf = [0u8; CONNLESS_PACKET_SIZE];
    match sock.recv_from(&mut buf) {
        Ok((n, from)) => Ok(strip_header(&buf[..n]).map(|payload| (from, payload.to_vec()))),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn strip_header(packet: &[u8]) -> Option<&[u8]> {
    if packet.len() < CONNLESS_HEADER.len() {
        return None;
    }
    if packet[..CONNLESS_HEADER.len()] != CONNLESS_HEADER {
        return None;
    }
    Some(&packet[CONNLESS_HEADER.len()..])
}

//! Peer side of the knock: building and sending knocked datagrams.
//!
//! A privileged peer reaches the hidden service by sending UDP whose payload
//! opens with the knock in network byte order. Any destination port works;
//! the filter scans all UDP traffic.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};

use aether_common::{Knock, ETH_HDR_LEN, ETH_P_IP, IPPROTO_UDP, IP_HDR_LEN, UDP_HDR_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tracing::debug;

/// Largest UDP payload that fits in a single IPv4 datagram.
pub const MAX_UDP_PAYLOAD: usize = u16::MAX as usize - IP_HDR_LEN - UDP_HDR_LEN;

/// Source MAC used by [`build_udp_frame`] (locally administered).
const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
/// Destination MAC used by [`build_udp_frame`] (locally administered).
const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

/// UDP payload carrying `knock` followed by `trailer`.
pub fn knock_payload(knock: Knock, trailer: &[u8]) -> Bytes {
    let mut payload = BytesMut::with_capacity(4 + trailer.len());
    payload.put_slice(&knock.to_wire());
    payload.put_slice(trailer);
    payload.freeze()
}

/// Build a complete Ethernet/IPv4/UDP frame around `payload`.
///
/// The IPv4 header has no options and a valid checksum; the UDP checksum is
/// left at zero. Returns `None` if the payload does not fit in one datagram.
pub fn build_udp_frame(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Option<Bytes> {
    if payload.len() > MAX_UDP_PAYLOAD {
        return None;
    }
    let udp_len = UDP_HDR_LEN + payload.len();
    let ip_len = IP_HDR_LEN + udp_len;

    let mut frame = BytesMut::with_capacity(ETH_HDR_LEN + ip_len);

    // Ethernet
    frame.put_slice(&DST_MAC);
    frame.put_slice(&SRC_MAC);
    frame.put_u16(ETH_P_IP);

    // IPv4
    let ip_start = frame.len();
    frame.put_u8(0x45); // version 4, IHL 5
    frame.put_u8(0); // DSCP/ECN
    frame.put_u16(ip_len as u16);
    frame.put_u16(0); // identification
    frame.put_u16(0x4000); // don't fragment
    frame.put_u8(64); // TTL
    frame.put_u8(IPPROTO_UDP);
    frame.put_u16(0); // checksum, filled below
    frame.put_slice(&src.ip().octets());
    frame.put_slice(&dst.ip().octets());
    let checksum = ipv4_checksum(&frame[ip_start..]);
    frame[ip_start + 10..ip_start + 12].copy_from_slice(&checksum.to_be_bytes());

    // UDP
    frame.put_u16(src.port());
    frame.put_u16(dst.port());
    frame.put_u16(udp_len as u16);
    frame.put_u16(0);

    frame.put_slice(payload);
    Some(frame.freeze())
}

/// RFC 1071 ones' complement checksum over an IPv4 header.
fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Sends knocked datagrams from a bound UDP socket.
pub struct KnockSender {
    socket: UdpSocket,
    knock: Knock,
}

impl KnockSender {
    /// Bind a sender on `local`.
    pub async fn bind(local: SocketAddr, knock: Knock) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket, knock })
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send the knock followed by `trailer` to `target`.
    pub async fn send(&self, target: SocketAddr, trailer: &[u8]) -> io::Result<usize> {
        let payload = knock_payload(self.knock, trailer);
        let sent = self.socket.send_to(&payload, target).await?;
        debug!(target = %target, bytes = sent, knock = %self.knock, "Knock sent");
        Ok(sent)
    }
}

//! Knock classification.
//!
//! A strict sequential gate: each layer is checked against the end of the
//! frame before any of its fields is read, and every early exit lands on
//! [`Decision::Pass`].

use crate::{
    Decision, FrameMeta, Knock, ETH_HDR_LEN, ETH_P_IP, ETH_TYPE_OFFSET, IPPROTO_UDP,
    IP_HDR_LEN, IP_PROTO_OFFSET, KNOCK_LEN, UDP_HDR_LEN,
};

/// Bounds-checked, read-only view of a received frame.
pub trait FrameBytes {
    /// Returns true when the first `end` bytes of the frame are readable.
    fn covers(&self, end: usize) -> bool;

    /// Copies `N` bytes starting at `offset`, or `None` if any of them lies
    /// past the end of the frame.
    fn read<const N: usize>(&self, offset: usize) -> Option<[u8; N]>;
}

impl FrameBytes for [u8] {
    #[inline(always)]
    fn covers(&self, end: usize) -> bool {
        end <= self.len()
    }

    #[inline(always)]
    fn read<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        let bytes = self.get(offset..end)?;
        <[u8; N]>::try_from(bytes).ok()
    }
}

/// Classify one frame.
///
/// Returns [`Decision::Redirect`] with the frame's RX queue when the frame is
/// Ethernet/IPv4/UDP and the first four payload bytes equal `knock` in
/// network byte order. Everything else passes.
///
/// The IPv4 header is assumed to be exactly 20 bytes; IHL is not consulted,
/// so packets carrying IP options are read at the wrong offset rather than
/// rejected. All destination ports are scanned.
#[inline(always)]
pub fn classify<F: FrameBytes + ?Sized>(frame: &F, meta: FrameMeta, knock: Knock) -> Decision {
    // Fail-open: a frame too short for the next field is ordinary traffic
    match try_classify(frame, meta, knock) {
        Ok(decision) => decision,
        Err(()) => Decision::Pass,
    }
}

#[inline(always)]
fn try_classify<F: FrameBytes + ?Sized>(
    frame: &F,
    meta: FrameMeta,
    knock: Knock,
) -> Result<Decision, ()> {
    // Ethernet
    let eth_end = ETH_HDR_LEN;
    if !frame.covers(eth_end) {
        return Err(());
    }
    let ether_type = u16::from_be_bytes(read(frame, ETH_TYPE_OFFSET)?);
    if ether_type != ETH_P_IP {
        return Ok(Decision::Pass);
    }

    // IPv4, fixed 20-byte header
    let ip_start = eth_end;
    let ip_end = ip_start + IP_HDR_LEN;
    if !frame.covers(ip_end) {
        return Err(());
    }
    let [protocol] = read::<F, 1>(frame, ip_start + IP_PROTO_OFFSET)?;
    if protocol != IPPROTO_UDP {
        return Ok(Decision::Pass);
    }

    // UDP
    let udp_end = ip_end + UDP_HDR_LEN;
    if !frame.covers(udp_end) {
        return Err(());
    }

    // Knock, compared byte-for-byte as transmitted
    let knock_end = udp_end + KNOCK_LEN;
    if !frame.covers(knock_end) {
        return Err(());
    }
    let payload: [u8; KNOCK_LEN] = read(frame, udp_end)?;
    if payload != knock.to_wire() {
        return Ok(Decision::Pass);
    }

    Ok(Decision::Redirect(meta.rx_queue))
}

#[inline(always)]
fn read<F: FrameBytes + ?Sized, const N: usize>(frame: &F, offset: usize) -> Result<[u8; N], ()> {
    frame.read(offset).ok_or(())
}

//! Aether Common - Shared kernel/userspace types and the knock classifier
//!
//! This crate holds everything the XDP program and the userspace loader must
//! agree on: wire constants, the knock value, BPF map names and the frame
//! classifier itself. The classifier is written against [`FrameBytes`] so the
//! exact same decision logic runs over an `XdpContext` in the kernel and over
//! a plain `&[u8]` in userspace tests.
//!
//! # Wire Contract
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────┬──────────────┬─────────────┐
//! │ Ethernet 14B │ IPv4 20B     │ UDP 8B   │ knock 4B     │ payload ... │
//! │ type 0x0800  │ proto 17     │ any port │ DE AD BE EF  │             │
//! └──────────────┴──────────────┴──────────┴──────────────┴─────────────┘
//!   0              14             34         42             46
//! ```
//!
//! # Safety
//!
//! No read is ever issued before the frame has been checked to cover it.
//! Every short, truncated or foreign frame classifies as [`Decision::Pass`].

#![cfg_attr(not(test), no_std)]

mod classify;

pub use classify::{classify, FrameBytes};

// ============================================================================
// WIRE CONSTANTS
// ============================================================================

/// Ethernet header size (no VLAN tags)
pub const ETH_HDR_LEN: usize = 14;
/// Offset of the EtherType field inside the Ethernet header
pub const ETH_TYPE_OFFSET: usize = 12;
/// EtherType for IPv4
pub const ETH_P_IP: u16 = 0x0800;
/// IPv4 header size assumed by the classifier (options are not consulted)
pub const IP_HDR_LEN: usize = 20;
/// Offset of the protocol field inside the IPv4 header
pub const IP_PROTO_OFFSET: usize = 9;
/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;
/// UDP header size
pub const UDP_HDR_LEN: usize = 8;
/// Size of the knock field at the start of the UDP payload
pub const KNOCK_LEN: usize = 4;
/// Offset of the knock field from the start of the frame
pub const KNOCK_OFFSET: usize = ETH_HDR_LEN + IP_HDR_LEN + UDP_HDR_LEN;
/// Shortest frame that can carry a knock
pub const MIN_KNOCK_FRAME_LEN: usize = KNOCK_OFFSET + KNOCK_LEN;

/// Compiled-in knock value.
pub const DEFAULT_KNOCK: u32 = 0xDEAD_BEEF;

/// Capacity of the XSKS_MAP (one AF_XDP socket per RX queue).
pub const XSKS_MAP_MAX_ENTRIES: u32 = 64;

/// XDP program name - must match the #[xdp] function in kernel code.
pub const XDP_PROGRAM_NAME: &str = "aether_xdp";

/// Name of the read-only global holding the knock inside the BPF object.
pub const KNOCK_GLOBAL: &str = "KNOCK";

/// BPF map names - must match exactly between kernel and userspace.
pub mod map_names {
    /// AF_XDP socket map keyed by RX queue index
    pub const XSKS_MAP: &str = "XSKS_MAP";
}

// ============================================================================
// TYPES
// ============================================================================

/// The 32-bit value a peer places at the start of a UDP payload to request
/// diversion to the fast path.
///
/// The value is compared in network byte order: `Knock::new(0xDEADBEEF)`
/// matches the on-wire bytes `DE AD BE EF`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Knock(u32);

impl Knock {
    /// The compiled-in knock (`0xDEADBEEF`).
    pub const DEFAULT: Knock = Knock(DEFAULT_KNOCK);

    /// Wrap a knock value.
    #[inline(always)]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Build a knock from the four bytes as they appear on the wire.
    #[inline(always)]
    pub const fn from_wire(bytes: [u8; KNOCK_LEN]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// The knock as a plain integer.
    #[inline(always)]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// The four bytes a matching frame carries on the wire.
    #[inline(always)]
    pub const fn to_wire(self) -> [u8; KNOCK_LEN] {
        self.0.to_be_bytes()
    }
}

impl Default for Knock {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-frame metadata supplied by the dispatcher alongside the buffer.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "userspace"), derive(Debug))]
pub struct FrameMeta {
    /// Ingress RX queue. Only ever used as the redirection key.
    pub rx_queue: u32,
    /// Total length of the frame buffer in bytes.
    pub len: usize,
}

impl FrameMeta {
    /// Create frame metadata.
    #[inline(always)]
    pub const fn new(rx_queue: u32, len: usize) -> Self {
        Self { rx_queue, len }
    }

    /// Metadata for a frame held in a byte slice.
    #[inline(always)]
    pub const fn for_slice(rx_queue: u32, frame: &[u8]) -> Self {
        Self::new(rx_queue, frame.len())
    }
}

/// Outcome of classifying one frame.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "userspace"), derive(Debug))]
pub enum Decision {
    /// Deliver to the normal network stack
    Pass,
    /// Divert to the fast-path channel registered for this RX queue
    Redirect(u32),
}

impl Decision {
    /// Returns true for [`Decision::Redirect`].
    #[inline(always)]
    pub const fn is_redirect(self) -> bool {
        matches!(self, Decision::Redirect(_))
    }

    /// Hand the decision to a redirection target and return its action.
    #[inline(always)]
    pub fn apply<T: RedirectTarget + ?Sized>(self, target: &T) -> T::Action {
        match self {
            Decision::Pass => target.pass(),
            Decision::Redirect(queue_id) => target.redirect(queue_id),
        }
    }
}

/// Capability through which a [`Decision`] is acted upon.
///
/// The channel table behind it is owned by the implementor; the classifier
/// never sees it. In the kernel this is the XSKS_MAP, in userspace an
/// in-process table of sinks.
pub trait RedirectTarget {
    /// What the dispatcher does with the frame.
    type Action;

    /// Leave the frame on the normal path.
    fn pass(&self) -> Self::Action;

    /// Divert the frame to the channel keyed by `queue_id`.
    fn redirect(&self, queue_id: u32) -> Self::Action;
}

// Compile-time layout assertions
const _: () = {
    assert!(core::mem::size_of::<Knock>() == 4);
    assert!(MIN_KNOCK_FRAME_LEN == 46);
};

#[cfg(any(test, feature = "userspace"))]
mod userspace_impls {
    use super::Knock;
    use core::fmt;

    impl fmt::Debug for Knock {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Knock({:#010x})", self.0)
        }
    }

    impl fmt::Display for Knock {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:#010x}", self.0)
        }
    }
}

// SAFETY: Knock is #[repr(transparent)] over u32; every bit pattern is valid
// and there is no padding.
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for Knock {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knock_wire_order() {
        assert_eq!(Knock::DEFAULT.to_wire(), [0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(Knock::from_wire([0xDE, 0xAD, 0xBE, 0xEF]), Knock::DEFAULT);
        assert_eq!(Knock::new(0x0102_0304).to_wire(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_knock_display() {
        assert_eq!(format!("{}", Knock::DEFAULT), "0xdeadbeef");
        assert_eq!(format!("{:?}", Knock::new(1)), "Knock(0x00000001)");
    }

    #[test]
    fn test_frame_offsets() {
        assert_eq!(KNOCK_OFFSET, 42);
        assert_eq!(MIN_KNOCK_FRAME_LEN, 46);
    }

    struct Recorder;

    impl RedirectTarget for Recorder {
        type Action = Option<u32>;

        fn pass(&self) -> Option<u32> {
            None
        }

        fn redirect(&self, queue_id: u32) -> Option<u32> {
            Some(queue_id)
        }
    }

    #[test]
    fn test_decision_apply() {
        assert_eq!(Decision::Pass.apply(&Recorder), None);
        assert_eq!(Decision::Redirect(9).apply(&Recorder), Some(9));
        assert!(Decision::Redirect(0).is_redirect());
        assert!(!Decision::Pass.is_redirect());
    }
}

//! Aether XDP Program - Kernel-level knock classification
//!
//! This program inspects every incoming frame at the XDP hook point
//! (earliest possible in the network stack). UDP datagrams whose payload
//! opens with the knock are redirected to the AF_XDP socket registered for
//! the RX queue they arrived on; everything else continues to the kernel.
//!
//! # Design Principles
//!
//! - **Fail-Open**: Any parsing failure returns XDP_PASS, never drop traffic
//! - **Hidden Knocks**: A knocked frame never reaches the kernel stack; with
//!   no socket on its queue it is aborted
//! - **Zero Allocation**: Fields are copied out of the packet after an
//!   explicit `data_end` check
//! - **Silent**: No logging or counters on the hot path
//!
//! # Packet Flow
//!
//! ```text
//! NIC → XDP Hook → Eth → IPv4 → UDP → knock?
//!                                        │
//!                        ┌───────────────┴───────────────┐
//!                        │                               │
//!                        ▼                               ▼
//!                  no / malformed                      match
//!                    XDP_PASS              XSKS_MAP[rx_queue_index]
//!                  (kernel stack)        XDP_REDIRECT, or XDP_ABORTED
//!                                          when no socket is registered
//! ```

#![no_std]
#![no_main]

use aether_common::{classify, FrameBytes, FrameMeta, Knock, RedirectTarget, XSKS_MAP_MAX_ENTRIES};
use aya_ebpf::{
    bindings::xdp_action,
    macros::{map, xdp},
    maps::XskMap,
    programs::XdpContext,
};

// ============================================================================
// BPF MAPS
// ============================================================================

/// AF_XDP socket map.
///
/// Key: RX queue index
/// Value: AF_XDP socket fd, registered by userspace
///
/// Pinned by name so consumers outside the loader process can register
/// their sockets under the loader's bpffs pin path.
#[map]
static XSKS_MAP: XskMap = XskMap::pinned(XSKS_MAP_MAX_ENTRIES, 0);

/// Knock value, patched by the loader before the program is loaded.
#[no_mangle]
static KNOCK: Knock = Knock::DEFAULT;

// ============================================================================
// XDP PROGRAM ENTRY POINT
// ============================================================================

/// Main XDP program entry point.
///
/// This function is called by the kernel for every incoming packet
/// on the attached interface.
#[xdp]
pub fn aether_xdp(ctx: XdpContext) -> u32 {
    let frame = XdpFrame(&ctx);
    // SAFETY: ctx.ctx points at the xdp_md handed to us by the kernel
    let rx_queue = unsafe { (*ctx.ctx).rx_queue_index };
    let meta = FrameMeta::new(rx_queue, ctx.data_end() - ctx.data());
    // SAFETY: KNOCK is a read-only global; the volatile read stops the
    // compiler from folding in the default value
    let knock = unsafe { core::ptr::read_volatile(&KNOCK) };

    classify(&frame, meta, knock).apply(&XskRedirect)
}

/// Packet bytes between `ctx.data()` and `ctx.data_end()`.
struct XdpFrame<'a>(&'a XdpContext);

impl FrameBytes for XdpFrame<'_> {
    #[inline(always)]
    fn covers(&self, end: usize) -> bool {
        self.0.data() + end <= self.0.data_end()
    }

    #[inline(always)]
    fn read<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let start = self.0.data();
        if start + offset + N > self.0.data_end() {
            return None;
        }
        // SAFETY: [start + offset, start + offset + N) was checked against data_end
        Some(unsafe { ((start + offset) as *const [u8; N]).read_unaligned() })
    }
}

/// Redirects through XSKS_MAP.
///
/// A queue with no registered socket aborts the frame, so a knock is never
/// answered by the host stack.
struct XskRedirect;

impl RedirectTarget for XskRedirect {
    type Action = u32;

    #[inline(always)]
    fn pass(&self) -> u32 {
        xdp_action::XDP_PASS
    }

    #[inline(always)]
    fn redirect(&self, queue_id: u32) -> u32 {
        // flags 0: a lookup miss yields XDP_ABORTED
        match XSKS_MAP.redirect(queue_id, 0) {
            Ok(action) => action,
            Err(_) => xdp_action::XDP_ABORTED,
        }
    }
}

// ============================================================================
// PANIC HANDLER (Required for #![no_std])
// ============================================================================

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    // The verifier rejects any program with a reachable panic path
    loop {}
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";

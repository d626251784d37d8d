//! Aether Core - Userspace side of the XDP knock filter
//!
//! The kernel program in `aether-ebpf` decides, for every received frame,
//! whether it carries the knock and belongs on an AF_XDP fast path. This
//! crate loads and attaches that program, registers the fast-path sockets,
//! and provides the in-process equivalents used for testing and by peers:
//!
//! - [`ebpf::EbpfManager`]: load, patch the knock, attach, register sockets
//! - [`channel::ChannelTable`]: userspace redirect table over the same classifier
//! - [`knock`]: build and send knocked datagrams
//! - [`config`]: environment configuration

pub mod channel;
pub mod config;
pub mod ebpf;
pub mod error;
pub mod knock;
pub mod runtime;

pub use aether_common::{classify, Decision, FrameMeta, Knock};
pub use channel::{ChannelTable, FrameSink, Route};
pub use config::AetherConfig;
pub use ebpf::{EbpfConfig, EbpfManager, XdpMode};
pub use error::{AetherError, Result};
pub use runtime::{build_runtime, shutdown_signal};

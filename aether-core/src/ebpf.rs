//! Userspace eBPF Manager for Aether.
//!
//! This module handles loading, attaching and managing the XDP knock filter
//! from userspace using the Aya framework.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     EbpfManager                                     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────┐  ┌─────────────────────────────────┐  │
//! │  │ BPF Loader (EbpfLoader)  │  │ XSKS_MAP                        │  │
//! │  │ KNOCK global patched     │  │ XskMap<rx queue, AF_XDP fd>     │  │
//! │  └──────────────────────────┘  └─────────────────────────────────┘  │
//! │              │                                 │                    │
//! │              ▼                                 ▼                    │
//! │  ┌────────────────────────────────────────────────────────────────┐ │
//! │  │                     XDP Program (aether_xdp)                   │ │
//! │  │            (attached to network interface)                     │ │
//! │  └────────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The AF_XDP sockets themselves are created by the consuming application.
//! XSKS_MAP is pinned under [`EbpfConfig::pin_path`] so an application in
//! another process can open `<pin_path>/XSKS_MAP` and insert its sockets;
//! an in-process consumer can use [`EbpfManager::register_socket`].

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use aya::maps::XskMap;
use aya::programs::{Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use aether_common::{map_names, Knock, KNOCK_GLOBAL, XDP_PROGRAM_NAME, XSKS_MAP_MAX_ENTRIES};

/// Errors that can occur during eBPF operations.
#[derive(Error, Debug)]
pub enum EbpfError {
    #[error("Failed to load eBPF program: {0}")]
    LoadError(String),

    #[error("Failed to attach XDP program to interface {interface}: {reason}")]
    AttachError { interface: String, reason: String },

    #[error("Failed to find default network interface")]
    NoDefaultInterface,

    #[error("BPF map operation failed: {0}")]
    MapError(String),

    #[error("RX queue {queue_id} exceeds XSKS_MAP capacity of {capacity}")]
    QueueOutOfRange { queue_id: u32, capacity: u32 },

    #[error("eBPF program not loaded")]
    NotLoaded,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for eBPF operations.
pub type Result<T> = std::result::Result<T, EbpfError>;

/// XDP attachment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XdpMode {
    /// SKB generic mode - works everywhere but slower
    Skb,
    /// Driver mode - faster, requires driver support
    Driver,
    /// Hardware offload - fastest, requires NIC support
    Hardware,
}

impl From<XdpMode> for XdpFlags {
    fn from(mode: XdpMode) -> Self {
        match mode {
            XdpMode::Skb => XdpFlags::SKB_MODE,
            XdpMode::Driver => XdpFlags::DRV_MODE,
            XdpMode::Hardware => XdpFlags::HW_MODE,
        }
    }
}

impl FromStr for XdpMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skb" | "generic" => Ok(XdpMode::Skb),
            "drv" | "driver" | "native" => Ok(XdpMode::Driver),
            "hw" | "hardware" | "offload" => Ok(XdpMode::Hardware),
            other => Err(other.to_string()),
        }
    }
}

/// Configuration for the eBPF manager.
#[derive(Debug, Clone)]
pub struct EbpfConfig {
    /// Whether the XDP filter should be attached at all.
    pub enabled: bool,

    /// Network interface to attach XDP program to.
    /// If None, auto-detect the default interface.
    pub interface: Option<String>,

    /// XDP attachment mode.
    pub xdp_mode: XdpMode,

    /// Path to the compiled eBPF object file.
    pub ebpf_object_path: Option<String>,

    /// Knock patched into the program's KNOCK global at load time.
    pub knock: Knock,

    /// bpffs directory XSKS_MAP is pinned under.
    pub pin_path: PathBuf,
}

/// Default bpffs directory for pinned maps.
pub const DEFAULT_PIN_PATH: &str = "/sys/fs/bpf/aether";

impl Default for EbpfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: None,
            xdp_mode: XdpMode::Skb, // Safe default that works everywhere
            ebpf_object_path: None,
            knock: Knock::DEFAULT,
            pin_path: PathBuf::from(DEFAULT_PIN_PATH),
        }
    }
}

/// eBPF Manager - handles XDP program lifecycle and the socket map.
///
/// # Example
///
/// ```ignore
/// let config = EbpfConfig {
///     ebpf_object_path: Some("target/bpfel-unknown-none/release/aether-ebpf".into()),
///     ..Default::default()
/// };
///
/// let manager = EbpfManager::new(config);
/// manager.load_and_attach()?;
///
/// // Route knocked frames arriving on queue 0 to an AF_XDP socket
/// manager.register_socket(0, &xsk_socket)?;
/// ```
pub struct EbpfManager {
    config: EbpfConfig,
    /// The loaded eBPF program and maps.
    bpf: RwLock<Option<Ebpf>>,
    /// Interface the XDP program is attached to.
    attached_interface: RwLock<Option<String>>,
    /// RX queues given a socket through this manager.
    registered_queues: RwLock<BTreeSet<u32>>,
}

impl EbpfManager {
    /// Create a new eBPF manager with the given configuration.
    pub fn new(config: EbpfConfig) -> Self {
        Self {
            config,
            bpf: RwLock::new(None),
            attached_interface: RwLock::new(None),
            registered_queues: RwLock::new(BTreeSet::new()),
        }
    }

    /// The knock the loaded program compares against.
    pub fn knock(&self) -> Knock {
        self.config.knock
    }

    /// Path of the pinned XSKS_MAP that external consumers open.
    pub fn pinned_map_path(&self) -> PathBuf {
        self.config.pin_path.join(map_names::XSKS_MAP)
    }

    /// Load the eBPF program and attach XDP to the network interface.
    ///
    /// # Steps
    /// 1. Load compiled eBPF object file with the KNOCK global patched and
    ///    XSKS_MAP pinned under the pin path
    /// 2. Detect default interface if not specified
    /// 3. Attach XDP program to the interface
    pub fn load_and_attach(&self) -> Result<()> {
        let ebpf_path = self
            .config
            .ebpf_object_path
            .as_ref()
            .ok_or_else(|| EbpfError::LoadError("No eBPF object path specified".into()))?;

        info!(path = %ebpf_path, knock = %self.config.knock, "Loading eBPF program");

        fs::create_dir_all(&self.config.pin_path)?;

        let knock = self.config.knock;
        let mut bpf = EbpfLoader::new()
            .map_pin_path(&self.config.pin_path)
            .set_global(KNOCK_GLOBAL, &knock, true)
            .load_file(ebpf_path)
            .map_err(|e| EbpfError::LoadError(e.to_string()))?;

        let interface = match &self.config.interface {
            Some(iface) => iface.clone(),
            None => detect_default_interface()?,
        };

        info!(interface = %interface, mode = ?self.config.xdp_mode, "Attaching XDP program");

        let program: &mut Xdp = bpf
            .program_mut(XDP_PROGRAM_NAME)
            .ok_or_else(|| {
                EbpfError::LoadError(format!("XDP program '{}' not found", XDP_PROGRAM_NAME))
            })?
            .try_into()
            .map_err(|e: aya::programs::ProgramError| EbpfError::LoadError(e.to_string()))?;

        program
            .load()
            .map_err(|e| EbpfError::LoadError(e.to_string()))?;

        program
            .attach(&interface, self.config.xdp_mode.into())
            .map_err(|e| EbpfError::AttachError {
                interface: interface.clone(),
                reason: e.to_string(),
            })?;

        info!(
            interface = %interface,
            pinned_map = %self.pinned_map_path().display(),
            "XDP program attached successfully"
        );

        *self.bpf.write() = Some(bpf);
        *self.attached_interface.write() = Some(interface);
        self.registered_queues.write().clear();

        Ok(())
    }

    /// Detach XDP program and unload eBPF.
    pub fn detach(&self) -> Result<()> {
        let mut bpf_guard = self.bpf.write();
        let mut iface_guard = self.attached_interface.write();

        if let Some(interface) = iface_guard.take() {
            info!(interface = %interface, "Detaching XDP program");
        }

        // Dropping the Ebpf struct detaches the program; the pinned map stays
        // in bpffs and is reused on the next load
        *bpf_guard = None;
        self.registered_queues.write().clear();

        Ok(())
    }

    /// Check if the eBPF program is loaded and attached.
    pub fn is_attached(&self) -> bool {
        self.bpf.read().is_some()
    }

    /// Get the interface the XDP program is attached to.
    pub fn attached_interface(&self) -> Option<String> {
        self.attached_interface.read().clone()
    }

    // ========================================================================
    // Socket Map Operations
    // ========================================================================

    /// Register the AF_XDP socket that receives knocked frames from `queue_id`.
    ///
    /// Replaces any socket previously registered for the queue.
    pub fn register_socket(&self, queue_id: u32, socket: impl AsRawFd) -> Result<()> {
        check_queue(queue_id)?;

        let mut bpf_guard = self.bpf.write();
        let bpf = bpf_guard.as_mut().ok_or(EbpfError::NotLoaded)?;

        let mut xsks: XskMap<_> =
            XskMap::try_from(bpf.map_mut(map_names::XSKS_MAP).ok_or_else(|| {
                EbpfError::MapError("XSKS_MAP map not found".into())
            })?)
            .map_err(|e| EbpfError::MapError(format!("Failed to create XskMap: {}", e)))?;

        xsks.set(queue_id, socket, 0)
            .map_err(|e| EbpfError::MapError(format!("Failed to register socket: {}", e)))?;

        self.registered_queues.write().insert(queue_id);

        debug!(queue_id = queue_id, "AF_XDP socket registered in XSKS_MAP");

        Ok(())
    }

    /// RX queues that currently have a socket registered.
    pub fn registered_queues(&self) -> Vec<u32> {
        self.registered_queues.read().iter().copied().collect()
    }
}

impl Drop for EbpfManager {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            error!(error = %e, "Failed to detach XDP program during drop");
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Reject queue ids that cannot be stored in XSKS_MAP.
#[inline]
fn check_queue(queue_id: u32) -> Result<()> {
    if queue_id >= XSKS_MAP_MAX_ENTRIES {
        return Err(EbpfError::QueueOutOfRange {
            queue_id,
            capacity: XSKS_MAP_MAX_ENTRIES,
        });
    }
    Ok(())
}

/// Detect the default network interface from /proc/net/route.
///
/// Parses the kernel routing table to find the interface with the default
/// route (destination 0.0.0.0).
fn detect_default_interface() -> Result<String> {
    let route_file = fs::File::open("/proc/net/route")?;
    if let Some(interface) = default_route_interface(BufReader::new(route_file))? {
        info!(interface = %interface, "Detected default network interface");
        return Ok(interface);
    }

    // Fallback: try common interface names
    for iface in &["eth0", "ens5", "ens3", "enp0s3", "wlan0"] {
        let path = format!("/sys/class/net/{}", iface);
        if Path::new(&path).exists() {
            warn!(
                interface = %iface,
                "No default route found, falling back to existing interface"
            );
            return Ok((*iface).to_string());
        }
    }

    Err(EbpfError::NoDefaultInterface)
}

/// Find the interface of the default route in a /proc/net/route table.
///
/// Format: Iface Destination Gateway Flags RefCnt Use Metric Mask MTU Window IRTT
fn default_route_interface<R: BufRead>(table: R) -> Result<Option<String>> {
    for line in table.lines().skip(1) {
        let line = line?;
        let mut fields = line.split_whitespace();
        if let (Some(interface), Some("00000000")) = (fields.next(), fields.next()) {
            return Ok(Some(interface.to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway\tFlags\tRefCnt\tUse\tMetric\tMask\tMTU\tWindow\tIRTT
docker0\t000011AC\t00000000\t0001\t0\t0\t0\t0000FFFF\t0\t0\t0
ens5\t00000000\t0100000A\t0003\t0\t0\t100\t00000000\t0\t0\t0
";

    #[test]
    fn test_default_route_interface() {
        let iface = default_route_interface(ROUTE_TABLE.as_bytes()).unwrap();
        assert_eq!(iface.as_deref(), Some("ens5"));
    }

    #[test]
    fn test_no_default_route() {
        let table = "Iface\tDestination\nlo\t0000007F\n";
        assert_eq!(default_route_interface(table.as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_xdp_mode_parse() {
        assert_eq!("skb".parse::<XdpMode>(), Ok(XdpMode::Skb));
        assert_eq!("DRV".parse::<XdpMode>(), Ok(XdpMode::Driver));
        assert_eq!("native".parse::<XdpMode>(), Ok(XdpMode::Driver));
        assert_eq!("hw".parse::<XdpMode>(), Ok(XdpMode::Hardware));
        assert_eq!("turbo".parse::<XdpMode>(), Err("turbo".to_string()));
    }

    #[test]
    fn test_load_without_object_path_fails() {
        let manager = EbpfManager::new(EbpfConfig::default());
        assert!(matches!(manager.load_and_attach(), Err(EbpfError::LoadError(_))));
        assert!(!manager.is_attached());
        assert_eq!(manager.attached_interface(), None);
    }

    #[test]
    fn test_pinned_map_path_follows_config() {
        let manager = EbpfManager::new(EbpfConfig::default());
        assert_eq!(
            manager.pinned_map_path(),
            PathBuf::from("/sys/fs/bpf/aether/XSKS_MAP")
        );

        let manager = EbpfManager::new(EbpfConfig {
            pin_path: PathBuf::from("/run/aether/bpf"),
            ..Default::default()
        });
        assert_eq!(
            manager.pinned_map_path(),
            PathBuf::from("/run/aether/bpf/XSKS_MAP")
        );
    }

    #[test]
    fn test_load_prepares_pin_directory() {
        let pin_path = std::env::temp_dir()
            .join(format!("aether-pin-{}", std::process::id()))
            .join("bpf");
        let manager = EbpfManager::new(EbpfConfig {
            ebpf_object_path: Some("/nonexistent/aether-ebpf".into()),
            pin_path: pin_path.clone(),
            ..Default::default()
        });

        // The object is missing, but the pin directory is created first
        assert!(matches!(manager.load_and_attach(), Err(EbpfError::LoadError(_))));
        assert!(pin_path.is_dir());
        assert!(!manager.is_attached());

        let _ = fs::remove_dir_all(pin_path.parent().unwrap());
    }

    #[test]
    fn test_register_socket_requires_loaded_program() {
        let manager = EbpfManager::new(EbpfConfig::default());
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let fd = socket.as_raw_fd();

        assert!(matches!(
            manager.register_socket(0, fd),
            Err(EbpfError::NotLoaded)
        ));
        assert!(matches!(
            manager.register_socket(XSKS_MAP_MAX_ENTRIES, fd),
            Err(EbpfError::QueueOutOfRange { queue_id: 64, capacity: 64 })
        ));
        assert!(manager.registered_queues().is_empty());
    }

    #[test]
    fn test_manager_reports_knock() {
        let manager = EbpfManager::new(EbpfConfig {
            knock: Knock::new(0x1234_5678),
            ..Default::default()
        });
        assert_eq!(manager.knock(), Knock::new(0x1234_5678));
    }
}

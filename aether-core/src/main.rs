//! Aether - XDP knock filter daemon
//!
//! Loads the XDP program, patches in the knock and attaches it to the
//! interface, then holds it attached until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Attach to the default-route interface in generic mode
//! AETHER_EBPF_OBJECT=target/bpfel-unknown-none/release/aether-ebpf aether
//!
//! # Native mode on a specific interface with a custom knock
//! AETHER_INTERFACE=ens5 AETHER_XDP_MODE=drv AETHER_KNOCK=0xCAFEBABE aether
//! ```

use aether_core::config::AetherConfig;
use aether_core::ebpf::EbpfManager;
use aether_core::runtime::{build_runtime, shutdown_signal};
use aether_core::AetherError;
use aether_common::XSKS_MAP_MAX_ENTRIES;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    let config = match AetherConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            let e = AetherError::from(e);
            error!(error = %e, "Invalid configuration");
            std::process::exit(e.exit_code());
        }
    };

    if !config.ebpf.enabled {
        info!("XDP filter disabled in configuration, exiting");
        return;
    }

    let runtime = match build_runtime(config.runtime.clone()) {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build runtime");
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        if let Err(e) = run(config).await {
            error!(error = %e, "Aether filter failed");
            std::process::exit(e.exit_code());
        }
    });
}

/// Initialize the tracing subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aether_core=debug,info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Attach the filter and hold it until SIGINT or SIGTERM.
async fn run(config: AetherConfig) -> aether_core::Result<()> {
    info!(
        path = config.ebpf.ebpf_object_path.as_deref().unwrap_or("unset"),
        interface = config.ebpf.interface.as_deref().unwrap_or("auto-detect"),
        mode = ?config.ebpf.xdp_mode,
        "Initializing Aether XDP filter"
    );

    let shutdown = shutdown_signal()?;

    let manager = EbpfManager::new(config.ebpf);
    manager.load_and_attach()?;

    info!(
        interface = manager.attached_interface().as_deref().unwrap_or("unknown"),
        knock = %manager.knock(),
        queues = XSKS_MAP_MAX_ENTRIES,
        pinned_map = %manager.pinned_map_path().display(),
        "Knock filter attached; unknocked traffic passes to the kernel"
    );

    let signal = shutdown.await;

    info!(signal, "Shutdown requested");
    manager.detach()?;

    Ok(())
}

//! aether-knock - send a knocked UDP datagram to a host running the filter.
//!
//! ```bash
//! aether-knock 203.0.113.7:443
//! aether-knock 203.0.113.7:443 0xCAFEBABE
//! ```

use std::net::SocketAddr;

use aether_core::config::parse_knock;
use aether_core::knock::KnockSender;
use aether_core::runtime::{build_runtime, RuntimeConfig};
use aether_core::Knock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: aether-knock <target-addr> [knock-hex]";

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);

    let target: SocketAddr = match args.next().map(|s| s.parse()) {
        Some(Ok(addr)) => addr,
        Some(Err(e)) => {
            error!(error = %e, "Invalid target address");
            error!("{}", USAGE);
            std::process::exit(2);
        }
        None => {
            error!("{}", USAGE);
            std::process::exit(2);
        }
    };

    if !target.is_ipv4() {
        error!(target = %target, "The knock filter only inspects IPv4 UDP");
        std::process::exit(2);
    }

    let knock = match args.next().map(|s| parse_knock(&s)) {
        Some(Ok(knock)) => knock,
        Some(Err(e)) => {
            error!(error = %e, "Invalid knock");
            std::process::exit(2);
        }
        None => Knock::DEFAULT,
    };

    let runtime = match build_runtime(RuntimeConfig {
        worker_threads: 1,
        max_blocking_threads: 1,
        ..Default::default()
    }) {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build runtime");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        let local: SocketAddr = ([0, 0, 0, 0], 0).into();
        let sender = KnockSender::bind(local, knock).await?;
        sender.send(target, &[]).await
    });

    match result {
        Ok(bytes) => info!(target = %target, knock = %knock, bytes = bytes, "Knock sent"),
        Err(e) => {
            error!(error = %e, target = %target, "Failed to send knock");
            std::process::exit(1);
        }
    }
}

//! Tokio runtime for the Aether daemon and tools.
//!
//! The data plane runs in the kernel; the runtime only drives the control
//! loop (signal handling, socket registration, the knock sender), so it is
//! kept small with a capped blocking pool.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::{Builder, Runtime};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Thread ID counter for naming workers
static WORKER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Configuration for the Aether runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: number of CPU cores)
    pub worker_threads: usize,
    /// Maximum blocking threads (default: 2)
    pub max_blocking_threads: usize,
    /// Thread stack size in bytes (default: 2MB)
    pub thread_stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus(),
            max_blocking_threads: 2,
            thread_stack_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Returns the number of available CPU cores.
#[inline]
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Build the multi-threaded Tokio runtime with named worker threads.
///
/// # Example
///
/// ```
/// use aether_core::runtime::build_runtime;
///
/// let rt = build_runtime(Default::default()).expect("runtime build failed");
/// rt.block_on(async {});
/// ```
pub fn build_runtime(config: RuntimeConfig) -> std::io::Result<Runtime> {
    info!(
        worker_threads = config.worker_threads,
        blocking_threads = config.max_blocking_threads,
        "Building Aether runtime"
    );

    Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .max_blocking_threads(config.max_blocking_threads)
        .thread_stack_size(config.thread_stack_size)
        .enable_all()
        .thread_name_fn(|| {
            let id = WORKER_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("aether-worker-{}", id)
        })
        .build()
}

/// Future resolving on the first SIGINT or SIGTERM, yielding its name.
///
/// Both handlers are installed before this returns, so a signal arriving
/// while the caller is still attaching is not lost. Must be called from
/// within a runtime.
pub fn shutdown_signal() -> io::Result<impl Future<Output = &'static str>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

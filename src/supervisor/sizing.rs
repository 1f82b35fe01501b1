//! Worker pool sizing.

use std::thread;

use crate::config::schema::SupervisorConfig;

/// Hosts above this many cores keep four cores free for the rest of the box.
const RESERVE_THRESHOLD: usize = 8;
const RESERVED_CORES: usize = 4;

/// Number of workers for a host with `total_cores` cores.
pub fn size_pool(total_cores: usize) -> usize {
    let workers = if total_cores > RESERVE_THRESHOLD {
        total_cores - RESERVED_CORES
    } else {
        total_cores
    };
    workers.max(1)
}

/// Cores available to this process, or 1 when that cannot be determined.
pub fn detect_cores() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Worker count for `config`: the explicit override, else sized from `cores`.
pub fn worker_count(config: &SupervisorConfig, cores: usize) -> usize {
    config.workers.unwrap_or_else(|| size_pool(cores)).max(1)
}

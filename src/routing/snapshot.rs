//! Versioned route-table snapshots.
//!
//! Workers read the current table once per request; a reload publishes a
//! whole new table with a single pointer swap.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::routing::router::RouteTable;

/// One published table and its version.
#[derive(Debug)]
pub struct VersionedTable {
    pub version: u64,
    pub table: RouteTable,
}

/// Atomically swappable holder of the current route table.
#[derive(Debug)]
pub struct RouteSnapshot {
    current: ArcSwap<VersionedTable>,
}

impl RouteSnapshot {
    /// Publish the initial table as version 1.
    pub fn new(table: RouteTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(VersionedTable { version: 1, table }),
        }
    }

    /// The table in effect right now. Callers keep it for the whole request.
    pub fn load(&self) -> Arc<VersionedTable> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Replace the table and return the new version.
    ///
    /// Only the worker's reload task swaps, so read-then-store is not racy.
    pub fn swap(&self, table: RouteTable) -> u64 {
        let version = self.current.load().version + 1;
        self.current.store(Arc::new(VersionedTable { version, table }));
        tracing::info!(version, routes = self.current.load().table.len(), "Route table swapped");
        version
    }
}

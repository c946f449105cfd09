use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Aggregate counters shared by every connection handler. Only ever
/// incremented or decremented atomically.
#[derive(Debug, Default)]
pub struct ProxyStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connection_errors_total: AtomicU64,
    pub bytes_client_to_target: AtomicU64,
    pub bytes_target_to_client: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connection_errors_total: u64,
    pub bytes_client_to_target: u64,
    pub bytes_target_to_client: u64,
}

impl ProxyStats {
    pub(crate) fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self, failed: bool) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        if failed {
            self.connection_errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connection_errors_total: self.connection_errors_total.load(Ordering::Relaxed),
            bytes_client_to_target: self.bytes_client_to_target.load(Ordering::Relaxed),
            bytes_target_to_client: self.bytes_target_to_client.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_updates_are_not_lost() {
        let stats = Arc::new(ProxyStats::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.connection_opened();
                        stats.connection_closed(i % 2 == 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_total, 8000);
        assert_eq!(snapshot.connections_active, 0);
        assert_eq!(snapshot.connection_errors_total, 4000);
    }
}

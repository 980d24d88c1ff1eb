use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(pub u64);

/// Snapshot handed to a sponsor when its lease comes up for renewal.
#[derive(Debug, Clone, Copy)]
pub struct LeaseStatus {
    pub id: LeaseId,
    pub deadline: Instant,
    pub renewal_window: Duration,
    pub renewals: u64,
}

/// Renewal policy for one lease.
///
/// Queried from the background ticker thread: the check must be cheap,
/// non-blocking, and side-effect-free. `None` means "do not renew"; the
/// lease then expires.
pub trait Sponsor: Send + Sync {
    fn renewal(&self, status: &LeaseStatus) -> Option<Duration>;
}

struct LeaseShared {
    expired: AtomicBool,
}

struct LeaseRecord {
    shared: Arc<LeaseShared>,
    deadline: Instant,
    renewal_window: Duration,
    renewals: u64,
    sponsor: Option<Arc<dyn Sponsor>>,
    on_expire: Option<Box<dyn FnOnce() + Send>>,
}

/// Liveness grants for every live proxy, scanned by the [`LeaseTicker`].
#[derive(Default)]
pub struct LeaseTable {
    next_id: AtomicU64,
    records: Mutex<HashMap<LeaseId, LeaseRecord>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lease; happens exactly once, when a proxy is created.
    /// `on_expire` runs at most once, after the sponsor declines (or none
    /// is registered); it must not call back into this table.
    pub fn register(
        self: &Arc<Self>,
        renewal_window: Duration,
        sponsor: Option<Arc<dyn Sponsor>>,
        on_expire: Option<Box<dyn FnOnce() + Send>>,
    ) -> LeaseHandle {
        let id = LeaseId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let shared = Arc::new(LeaseShared {
            expired: AtomicBool::new(false),
        });
        let record = LeaseRecord {
            shared: Arc::clone(&shared),
            deadline: Instant::now() + renewal_window,
            renewal_window,
            renewals: 0,
            sponsor,
            on_expire,
        };
        self.records.lock().insert(id, record);
        tracing::debug!(target: "cloister_host::lease", lease = id.0, "lease registered");
        LeaseHandle {
            id,
            shared,
            table: Arc::clone(self),
        }
    }

    fn unregister_sponsor(&self, id: LeaseId) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.sponsor = None;
        }
    }

    /// Remove a lease entirely; the expiry action never fires.
    fn release(&self, id: LeaseId) {
        if self.records.lock().remove(&id).is_some() {
            tracing::debug!(target: "cloister_host::lease", lease = id.0, "lease released");
        }
    }

    pub fn active_count(&self) -> usize {
        self.records.lock().len()
    }

    /// One renewal pass. Sponsors are queried with the table lock released,
    /// so a slow (misbehaving) sponsor cannot block registration or
    /// release; the decision is re-applied only if the lease still exists
    /// and still has a sponsor.
    pub fn tick(&self, now: Instant) {
        let due: Vec<(LeaseId, Option<Arc<dyn Sponsor>>, LeaseStatus)> = {
            let records = self.records.lock();
            records
                .iter()
                .filter(|(_, r)| r.deadline <= now)
                .map(|(id, r)| {
                    (
                        *id,
                        r.sponsor.clone(),
                        LeaseStatus {
                            id: *id,
                            deadline: r.deadline,
                            renewal_window: r.renewal_window,
                            renewals: r.renewals,
                        },
                    )
                })
                .collect()
        };
        if due.is_empty() {
            return;
        }

        let mut expiry_actions: Vec<(LeaseId, Option<Box<dyn FnOnce() + Send>>)> = Vec::new();
        for (id, sponsor, status) in due {
            let decision = sponsor.as_ref().and_then(|s| s.renewal(&status));
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(&id) else {
                // Released while the sponsor was being queried.
                continue;
            };
            match decision {
                // A renewal against a sponsor unregistered mid-query must
                // not stick: no sponsor means "do not renew".
                Some(window) if record.sponsor.is_some() => {
                    record.deadline = Instant::now() + window;
                    record.renewals += 1;
                    tracing::trace!(
                        target: "cloister_host::lease",
                        lease = id.0,
                        renewals = record.renewals,
                        "lease renewed"
                    );
                }
                _ => {
                    record.shared.expired.store(true, Ordering::Release);
                    let action = record.on_expire.take();
                    records.remove(&id);
                    expiry_actions.push((id, action));
                }
            }
        }

        // Expiry is silent towards proxy holders; only the bookkeeping side
        // effect (releasing the proxied instance) runs, outside the lock.
        for (id, action) in expiry_actions {
            tracing::debug!(target: "cloister_host::lease", lease = id.0, "lease expired");
            if let Some(action) = action {
                action();
            }
        }
    }
}

/// Shared handle onto one registered lease.
#[derive(Clone)]
pub struct LeaseHandle {
    id: LeaseId,
    shared: Arc<LeaseShared>,
    table: Arc<LeaseTable>,
}

impl LeaseHandle {
    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        !self.shared.expired.load(Ordering::Acquire)
    }

    /// Detach the sponsor; happens exactly once, at explicit unload, before
    /// the proxy itself is dropped. Safe to race with a renewal query.
    pub fn unregister_sponsor(&self) {
        self.table.unregister_sponsor(self.id);
    }

    pub fn release(&self) {
        self.table.release(self.id);
    }
}

/// Background renewal scan: a plain timer thread sending itself through the
/// lease table at a fixed cadence. Holds only the table, never host-side
/// locks.
pub struct LeaseTicker {
    shutdown: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl LeaseTicker {
    pub fn spawn(table: Arc<LeaseTable>, interval: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let join = std::thread::Builder::new()
            .name("cloister-lease-ticker".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => table.tick(Instant::now()),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for LeaseTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

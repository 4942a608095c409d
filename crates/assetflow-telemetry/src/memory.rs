//! Memory introspection

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One memory reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Memory in use by the page/process, MB
    pub used_mb: f64,
    /// Memory currently reserved, MB
    pub total_mb: f64,
    /// Upper bound the runtime will allow, MB
    pub limit_mb: f64,
    /// Wall-clock time of the reading, ms since the Unix epoch
    pub timestamp_ms: u64,
}

impl MemorySample {
    /// Build a sample from byte counts, stamped with the current time
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_bytes(used: u64, total: u64, limit: u64) -> Self {
        Self {
            used_mb: used as f64 / BYTES_PER_MB,
            total_mb: total as f64 / BYTES_PER_MB,
            limit_mb: limit as f64 / BYTES_PER_MB,
            timestamp_ms: now_ms(),
        }
    }

    /// Build a sample from megabyte figures, stamped with the current time
    #[must_use]
    pub fn from_mb(used_mb: f64, total_mb: f64, limit_mb: f64) -> Self {
        Self {
            used_mb,
            total_mb,
            limit_mb,
            timestamp_ms: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Runtime memory introspection
///
/// Returning `None` means the runtime does not expose memory figures; the
/// sampler treats that as "feature unavailable" and stops.
pub trait MemorySource: Send + Sync {
    /// Take one reading
    fn sample(&self) -> Option<MemorySample>;
}

/// Process memory via `sysinfo`
///
/// `used` is the resident set of the current process, `total` the machine's
/// memory and `limit` the cgroup limit when one is set.
pub struct SystemMemory {
    system: Mutex<System>,
    pid: Pid,
}

impl SystemMemory {
    /// Probe the platform, `None` when process memory cannot be read
    #[must_use]
    pub fn detect() -> Option<Self> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }
        let pid = sysinfo::get_current_pid().ok()?;
        Some(Self {
            system: Mutex::new(System::new()),
            pid,
        })
    }
}

impl std::fmt::Debug for SystemMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemory").field("pid", &self.pid).finish_non_exhaustive()
    }
}

impl MemorySource for SystemMemory {
    fn sample(&self) -> Option<MemorySample> {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let used = system.process(self.pid)?.memory();
        let total = system.total_memory();
        let limit = system
            .cgroup_limits()
            .map_or(total, |limits| limits.total_memory);
        Some(MemorySample::from_bytes(used, total, limit))
    }
}

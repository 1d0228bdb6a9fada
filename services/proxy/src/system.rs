//! Host resource sampling for the health and stats endpoints.

use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Memory figures reported by the observability endpoints, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// Resident set size of this process.
    pub process_rss_bytes: u64,
    /// Total memory of the host.
    pub system_total_bytes: u64,
    /// Memory in use on the host.
    pub system_used_bytes: u64,
}

/// Point-in-time host usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostUsage {
    pub memory: MemoryUsage,
    /// CPU usage of this process since the previous sample, in percent of one core.
    pub process_cpu_percent: f32,
}

/// Samples process and host resource usage.
///
/// The `System` is kept between samples because sysinfo computes CPU usage
/// as a delta against the previous refresh.
pub struct HostSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Take a fresh sample.
    pub fn sample(&self) -> HostUsage {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        system.refresh_memory();
        let mut usage = HostUsage {
            memory: MemoryUsage {
                process_rss_bytes: 0,
                system_total_bytes: system.total_memory(),
                system_used_bytes: system.used_memory(),
            },
            process_cpu_percent: 0.0,
        };

        if let Some(pid) = self.pid {
            let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
            if let Some(process) = system.process(pid) {
                usage.memory.process_rss_bytes = process.memory();
                usage.process_cpu_percent = process.cpu_usage();
            }
        }

        usage
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

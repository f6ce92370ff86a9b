//! Host telemetry snapshot shown next to the log listing.

use serde::Serialize;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub hostname: String,
    pub os: String,
    pub uptime_secs: u64,
    pub load_avg: [f64; 3],
    pub cpu_count: usize,
    pub cpu_percent: f32,
    pub memory_used: u64,
    pub memory_total: u64,
    pub swap_used: u64,
    pub swap_total: u64,
}

impl HostSnapshot {
    pub fn memory_percent(&self) -> f32 {
        percent(self.memory_used, self.memory_total)
    }

    pub fn swap_percent(&self) -> f32 {
        percent(self.swap_used, self.swap_total)
    }
}

/// Keeps a `sysinfo::System` around so CPU usage has a baseline between samples.
pub struct HostMonitor {
    sys: System,
}

impl HostMonitor {
    pub fn new() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self { sys }
    }

    pub fn sample(&mut self) -> HostSnapshot {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let load = System::load_average();
        let os = match (System::name(), System::os_version()) {
            (Some(name), Some(version)) => format!("{} {}", name, version),
            (Some(name), None) => name,
            _ => "unknown".to_string(),
        };

        HostSnapshot {
            hostname: System::host_name().unwrap_or_else(|| "localhost".to_string()),
            os,
            uptime_secs: System::uptime(),
            load_avg: [load.one, load.five, load.fifteen],
            cpu_count: self.sys.cpus().len(),
            cpu_percent: self.sys.global_cpu_usage(),
            memory_used: self.sys.used_memory(),
            memory_total: self.sys.total_memory(),
            swap_used: self.sys.used_swap(),
            swap_total: self.sys.total_swap(),
        }
    }
}

impl Default for HostMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        ((used as f64 / total as f64) * 100.0) as f32
    }
}

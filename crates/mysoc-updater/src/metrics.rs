//! Host metrics collection

use sysinfo::{Disks, System};

use updates_common::SystemMetrics;

/// Snapshot the host's resource usage
pub fn collect() -> SystemMetrics {
    let mut sys = System::new_all();
    sys.refresh_all();

    let (disk_total, disk_used) = disk_usage();

    SystemMetrics {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpu_usage: sys.global_cpu_info().cpu_usage() as f64,
        memory_total: sys.total_memory(),
        memory_used: sys.used_memory(),
        disk_total,
        disk_used,
        load_average: System::load_average().one,
        uptime: System::uptime(),
    }
}

/// Host name as reported by the OS
pub fn hostname() -> String {
    System::host_name().unwrap_or_else(|| "unknown".to_string())
}

fn disk_usage() -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    let mut total = 0u64;
    let mut used = 0u64;

    for disk in disks.list() {
        total += disk.total_space();
        used += disk.total_space().saturating_sub(disk.available_space());
    }

    (total, used)
}

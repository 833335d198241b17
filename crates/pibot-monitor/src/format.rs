//! Plain-text rendering of host telemetry for chat replies.

use std::net::{IpAddr, Ipv4Addr};

const MB: u64 = 1024 * 1024;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One running process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub mem_percent: f32,
}

/// Space used on one mount point, in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub mount: String,
    pub total: u64,
    pub used: u64,
}

pub fn format_system_stats(cpu_percent: f32, used_memory: u64, total_memory: u64) -> String {
    format!(
        "CPU Usage: {:.1}%\nRAM Usage: {} MB / {} MB",
        cpu_percent,
        used_memory / MB,
        total_memory / MB
    )
}

/// Pick the CPU sensor: first label mentioning "cpu", else the hottest reading.
pub fn pick_cpu_temperature(readings: &[(String, f32)]) -> Option<f32> {
    readings
        .iter()
        .find(|(label, _)| label.to_lowercase().contains("cpu"))
        .map(|(_, t)| *t)
        .or_else(|| {
            readings
                .iter()
                .map(|(_, t)| *t)
                .filter(|t| t.is_finite())
                .reduce(f32::max)
        })
}

pub fn format_temperature(celsius: f32) -> String {
    format!("CPU Temperature: {celsius:.1}°C")
}

pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    format!("System Uptime: {days} days, {hours} hours, {minutes} minutes")
}

/// The `limit` busiest processes by CPU, numbered from 1.
pub fn format_top_processes(mut processes: Vec<ProcessInfo>, limit: usize) -> String {
    processes.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));

    let mut out = format!("Top {limit} Processes:\n");
    for (i, p) in processes.iter().take(limit).enumerate() {
        out.push_str(&format!(
            "{}. {} (PID: {})\n   CPU: {:.1}%, MEM: {:.1}%\n",
            i + 1,
            p.name,
            p.pid,
            p.cpu_percent,
            p.mem_percent
        ));
    }
    out
}

pub fn format_disk_usage(disks: &[DiskInfo]) -> String {
    let mut out = String::from("Disk Usage:\n");
    for disk in disks {
        let percent = if disk.total > 0 {
            disk.used as f64 / disk.total as f64 * 100.0
        } else {
            0.0
        };
        out.push_str(&format!(
            "{}:\n  Used: {:.1} GB / {:.1} GB ({:.1}%)\n",
            disk.mount,
            disk.used as f64 / GB,
            disk.total as f64 / GB,
            percent
        ));
    }
    out
}

/// IPv4 addresses that are worth reporting (loopback and IPv6 are skipped).
pub fn reportable_ipv4(addr: IpAddr) -> Option<Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
        _ => None,
    }
}

pub fn format_network_details(interfaces: &[(String, Ipv4Addr)]) -> String {
    let mut out = String::from("Network Details:\n");
    for (name, ip) in interfaces {
        out.push_str(&format!("{name}: {ip}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_system_stats() {
        assert_eq!(
            format_system_stats(12.345, 512 * MB, 1024 * MB),
            "CPU Usage: 12.3%\nRAM Usage: 512 MB / 1024 MB"
        );
    }

    #[test]
    fn test_pick_cpu_temperature() {
        let readings = vec![
            ("nvme Composite".to_string(), 60.0),
            ("CPU Package".to_string(), 48.5),
        ];
        assert_eq!(pick_cpu_temperature(&readings), Some(48.5));

        let no_cpu = vec![("acpitz".to_string(), 41.0), ("gpu".to_string(), 55.0)];
        assert_eq!(pick_cpu_temperature(&no_cpu), Some(55.0));

        assert_eq!(pick_cpu_temperature(&[]), None);
        assert_eq!(format_temperature(48.26), "CPU Temperature: 48.3°C");
    }

    #[test]
    fn test_uptime() {
        assert_eq!(format_uptime(0), "System Uptime: 0 days, 0 hours, 0 minutes");
        let secs = 2 * 86_400 + 5 * 3_600 + 17 * 60 + 59;
        assert_eq!(format_uptime(secs), "System Uptime: 2 days, 5 hours, 17 minutes");
    }

    #[test]
    fn test_top_processes_sorted_and_limited() {
        let procs = (1..=7)
            .map(|i| ProcessInfo {
                pid: i,
                name: format!("p{i}"),
                cpu_percent: i as f32,
                mem_percent: 1.0,
            })
            .collect();
        let out = format_top_processes(procs, 5);
        assert!(out.starts_with("Top 5 Processes:\n1. p7 (PID: 7)\n   CPU: 7.0%, MEM: 1.0%\n"));
        assert!(out.contains("5. p3 (PID: 3)"));
        assert!(!out.contains("p2"));
    }

    #[test]
    fn test_disk_usage() {
        let gb = 1024 * 1024 * 1024;
        let out = format_disk_usage(&[
            DiskInfo { mount: "/".into(), total: 4 * gb, used: gb },
            DiskInfo { mount: "/boot".into(), total: 0, used: 0 },
        ]);
        assert_eq!(
            out,
            "Disk Usage:\n/:\n  Used: 1.0 GB / 4.0 GB (25.0%)\n/boot:\n  Used: 0.0 GB / 0.0 GB (0.0%)\n"
        );
    }

    #[test]
    fn test_network_details() {
        assert_eq!(reportable_ipv4(IpAddr::V4(Ipv4Addr::LOCALHOST)), None);
        assert_eq!(reportable_ipv4(IpAddr::V6(Ipv6Addr::UNSPECIFIED)), None);
        let lan = Ipv4Addr::new(192, 168, 1, 20);
        assert_eq!(reportable_ipv4(IpAddr::V4(lan)), Some(lan));

        assert_eq!(
            format_network_details(&[("eth0".into(), lan)]),
            "Network Details:\neth0: 192.168.1.20\n"
        );
    }
}

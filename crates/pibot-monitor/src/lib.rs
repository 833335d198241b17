//! # PiBot Monitor
//!
//! Host telemetry backing the `/status`, `/temp`, `/uptime`, `/top`, `/disk`,
//! `/network_details` and `/reboot` commands. Readings come from `sysinfo`
//! and are rendered as plain text by [`format`].

pub mod format;

use async_trait::async_trait;
use pibot_core::error::{PiBotError, Result};
use std::time::Duration;
use sysinfo::{Components, Disks, Networks, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::format::{DiskInfo, ProcessInfo};

/// Number of processes listed by `/top`.
pub const TOP_PROCESS_COUNT: usize = 5;

/// CPU usage needs two samples this far apart.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Host telemetry as chat-ready text.
#[async_trait]
pub trait HostMonitor: Send + Sync {
    async fn system_stats(&self) -> Result<String>;
    async fn temperature(&self) -> Result<String>;
    async fn uptime(&self) -> Result<String>;
    async fn top_processes(&self) -> Result<String>;
    async fn disk_usage(&self) -> Result<String>;
    async fn network_details(&self) -> Result<String>;
    /// Reboot the host. Requires passwordless `sudo reboot`.
    async fn reboot(&self) -> Result<String>;
}

/// [`HostMonitor`] backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Monitor;

impl Monitor {
    pub fn new() -> Self {
        Self
    }
}

/// Run a blocking telemetry read off the async runtime.
async fn blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PiBotError::Monitor(format!("{what} task failed: {e}")))?
}

#[async_trait]
impl HostMonitor for Monitor {
    async fn system_stats(&self) -> Result<String> {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Ok(format::format_system_stats(
            sys.global_cpu_usage(),
            sys.used_memory(),
            sys.total_memory(),
        ))
    }

    async fn temperature(&self) -> Result<String> {
        blocking("temperature", || {
            let components = Components::new_with_refreshed_list();
            let readings: Vec<(String, f32)> = components
                .list()
                .iter()
                .map(|c| (c.label().to_string(), c.temperature()))
                .collect();
            tracing::debug!("Read {} temperature sensors", readings.len());

            format::pick_cpu_temperature(&readings)
                .map(format::format_temperature)
                .ok_or_else(|| PiBotError::Monitor("no temperature sensors found".into()))
        })
        .await
    }

    async fn uptime(&self) -> Result<String> {
        Ok(format::format_uptime(System::uptime()))
    }

    async fn top_processes(&self) -> Result<String> {
        let refresh = ProcessRefreshKind::new().with_cpu().with_memory();
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);
        tokio::time::sleep(CPU_SAMPLE_INTERVAL.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        let total_memory = sys.total_memory().max(1) as f32;
        let processes = sys
            .processes()
            .values()
            .map(|p| ProcessInfo {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                cpu_percent: p.cpu_usage(),
                mem_percent: p.memory() as f32 / total_memory * 100.0,
            })
            .collect();

        Ok(format::format_top_processes(processes, TOP_PROCESS_COUNT))
    }

    async fn disk_usage(&self) -> Result<String> {
        blocking("disk usage", || {
            let disks = Disks::new_with_refreshed_list();
            let info: Vec<DiskInfo> = disks
                .iter()
                .map(|d| {
                    let total = d.total_space();
                    DiskInfo {
                        mount: d.mount_point().to_string_lossy().into_owned(),
                        total,
                        used: total.saturating_sub(d.available_space()),
                    }
                })
                .collect();
            Ok(format::format_disk_usage(&info))
        })
        .await
    }

    async fn network_details(&self) -> Result<String> {
        blocking("network details", || {
            let networks = Networks::new_with_refreshed_list();
            let mut interfaces: Vec<(String, std::net::Ipv4Addr)> = networks
                .list()
                .iter()
                .flat_map(|(name, data)| {
                    data.ip_networks()
                        .iter()
                        .filter_map(|net| format::reportable_ipv4(net.addr))
                        .map(|ip| (name.clone(), ip))
                        .collect::<Vec<_>>()
                })
                .collect();
            interfaces.sort();
            Ok(format::format_network_details(&interfaces))
        })
        .await
    }

    async fn reboot(&self) -> Result<String> {
        tracing::warn!("Reboot requested");
        let status = tokio::process::Command::new("sudo")
            .args(["-n", "reboot"])
            .status()
            .await
            .map_err(|e| {
                PiBotError::Monitor(format!(
                    "error rebooting system (make sure NOPASSWD is configured in sudoers): {e}"
                ))
            })?;

        if !status.success() {
            return Err(PiBotError::Monitor(format!(
                "error rebooting system (make sure NOPASSWD is configured in sudoers): {status}"
            )));
        }
        Ok("System is rebooting...".into())
    }
}

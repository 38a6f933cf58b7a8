//! Metrics collection using sysinfo for hudmon_agent.
//!
//! Each subsystem query is independent. `SysinfoSource` keeps its sysinfo
//! handles alive between ticks (CPU usage and network counters are deltas
//! against the previous refresh) and runs the refreshes on the blocking pool
//! so the assembler can await all of them at once.

use futures::future::BoxFuture;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Instant;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuSample {
    pub load_pct: f64,
    pub cores: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSample {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkSample {
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// This subsystem has nothing to report (no disks, no interfaces, ...).
    #[error("{0} reported no data")]
    NoData(&'static str),

    #[error("{subsystem} query failed: {reason}")]
    Task {
        subsystem: &'static str,
        reason: String,
    },

    /// The metric layer as a whole cannot be reached; the tick cannot be assembled.
    #[error("metric layer unreachable: {0}")]
    Unreachable(String),
}

/// Host metric queries, one per subsystem. GPU lives in [`crate::gpu`].
pub trait MetricSource: Send + Sync {
    fn hostname(&self) -> String;
    fn cpu(&self) -> BoxFuture<'_, Result<CpuSample, SourceError>>;
    fn memory(&self) -> BoxFuture<'_, Result<MemorySample, SourceError>>;
    fn disk(&self) -> BoxFuture<'_, Result<DiskSample, SourceError>>;
    fn network(&self) -> BoxFuture<'_, Result<NetworkSample, SourceError>>;
}

struct NetState {
    networks: Networks,
    last_refresh: Instant,
}

pub struct SysinfoSource {
    // CPU and memory refresh on separate handles so neither waits on the other.
    cpu: Arc<Mutex<System>>,
    mem: Arc<Mutex<System>>,
    disks: Arc<Mutex<Disks>>,
    nets: Arc<Mutex<NetState>>,
    hostname: String,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut cpu = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        // Prime CPU usage so the first tick has a baseline to diff against.
        cpu.refresh_cpu_usage();
        let mem = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );

        let hostname = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .or_else(System::host_name)
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            cpu: Arc::new(Mutex::new(cpu)),
            mem: Arc::new(Mutex::new(mem)),
            disks: Arc::new(Mutex::new(Disks::new_with_refreshed_list())),
            nets: Arc::new(Mutex::new(NetState {
                networks: Networks::new_with_refreshed_list(),
                last_refresh: Instant::now(),
            })),
            hostname,
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

// A refresh the assembler gave up on may still hold its handle; later ticks
// report the field as unavailable instead of queueing behind it. A panic
// mid-refresh leaves the handle usable; the next refresh overwrites it.
fn claim<'a, T>(subsystem: &'static str, m: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, SourceError> {
    match m.try_lock() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::Poisoned(p)) => Ok(p.into_inner()),
        Err(TryLockError::WouldBlock) => Err(SourceError::Task {
            subsystem,
            reason: "previous refresh still running".into(),
        }),
    }
}

async fn on_blocking_pool<T, F>(subsystem: &'static str, f: F) -> Result<T, SourceError>
where
    F: FnOnce() -> Result<T, SourceError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(r) => r,
        Err(e) if e.is_cancelled() => Err(SourceError::Unreachable(format!(
            "{subsystem}: blocking pool is shutting down"
        ))),
        Err(e) => Err(SourceError::Task {
            subsystem,
            reason: e.to_string(),
        }),
    }
}

fn is_loopback(iface: &str) -> bool {
    iface == "lo" || iface.starts_with("lo0") || iface.to_ascii_lowercase().contains("loopback")
}

/// `(mount point, total bytes, available bytes)` per filesystem. Prefers the
/// one mounted at `/`, else the first listed.
fn root_disk<'a, I>(mounts: I) -> Option<DiskSample>
where
    I: IntoIterator<Item = (&'a Path, u64, u64)>,
{
    let mut first = None;
    for (mount, total, available) in mounts {
        let sample = DiskSample {
            total_bytes: total,
            used_bytes: total.saturating_sub(available),
        };
        if mount == Path::new("/") {
            return Some(sample);
        }
        first.get_or_insert(sample);
    }
    first
}

/// `(interface, bytes received, bytes transmitted)` since the previous
/// refresh, `elapsed_secs` ago. Loopback traffic is left out.
fn network_rate<'a, I>(ifaces: I, elapsed_secs: f64) -> Result<NetworkSample, SourceError>
where
    I: IntoIterator<Item = (&'a str, u64, u64)>,
{
    let (mut rx, mut tx, mut seen) = (0u64, 0u64, 0usize);
    for (name, received, transmitted) in ifaces {
        if is_loopback(name) {
            continue;
        }
        rx = rx.saturating_add(received);
        tx = tx.saturating_add(transmitted);
        seen += 1;
    }
    if seen == 0 {
        return Err(SourceError::NoData("network"));
    }
    if elapsed_secs <= f64::EPSILON {
        debug!("network refreshed twice within one clock step");
        return Ok(NetworkSample {
            rx_bytes_per_sec: 0.0,
            tx_bytes_per_sec: 0.0,
        });
    }
    Ok(NetworkSample {
        rx_bytes_per_sec: rx as f64 / elapsed_secs,
        tx_bytes_per_sec: tx as f64 / elapsed_secs,
    })
}

impl MetricSource for SysinfoSource {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn cpu(&self) -> BoxFuture<'_, Result<CpuSample, SourceError>> {
        let sys = Arc::clone(&self.cpu);
        Box::pin(on_blocking_pool("cpu", move || {
            let mut sys = claim("cpu", &sys)?;
            sys.refresh_cpu_usage();
            let cores = sys.cpus().len();
            if cores == 0 {
                return Err(SourceError::NoData("cpu"));
            }
            Ok(CpuSample {
                load_pct: f64::from(sys.global_cpu_usage()),
                cores,
            })
        }))
    }

    fn memory(&self) -> BoxFuture<'_, Result<MemorySample, SourceError>> {
        let sys = Arc::clone(&self.mem);
        Box::pin(on_blocking_pool("memory", move || {
            let mut sys = claim("memory", &sys)?;
            sys.refresh_memory();
            let total_bytes = sys.total_memory();
            if total_bytes == 0 {
                return Err(SourceError::NoData("memory"));
            }
            Ok(MemorySample {
                total_bytes,
                used_bytes: total_bytes.saturating_sub(sys.available_memory()),
            })
        }))
    }

    fn disk(&self) -> BoxFuture<'_, Result<DiskSample, SourceError>> {
        let disks = Arc::clone(&self.disks);
        Box::pin(on_blocking_pool("disk", move || {
            let mut disks = claim("disk", &disks)?;
            disks.refresh(true);
            root_disk(
                disks
                    .list()
                    .iter()
                    .map(|d| (d.mount_point(), d.total_space(), d.available_space())),
            )
            .ok_or(SourceError::NoData("disk"))
        }))
    }

    fn network(&self) -> BoxFuture<'_, Result<NetworkSample, SourceError>> {
        let nets = Arc::clone(&self.nets);
        Box::pin(on_blocking_pool("network", move || {
            let mut state = claim("network", &nets)?;
            state.networks.refresh(true);
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refresh).as_secs_f64();
            state.last_refresh = now;
            // received()/transmitted() are deltas since the previous refresh
            network_rate(
                state
                    .networks
                    .iter()
                    .map(|(name, data)| (name.as_str(), data.received(), data.transmitted())),
                elapsed,
            )
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_interfaces_are_skipped() {
        assert!(is_loopback("lo"));
        assert!(is_loopback("lo0"));
        assert!(is_loopback("Loopback Pseudo-Interface 1"));
        assert!(!is_loopback("eth0"));
        assert!(!is_loopback("wlan0"));
    }

    #[test]
    fn root_mount_wins_over_list_order() {
        let mounts = [
            (Path::new("/boot"), 1_000, 900),
            (Path::new("/"), 10_000, 4_000),
            (Path::new("/home"), 50_000, 1_000),
        ];
        let d = root_disk(mounts).unwrap();
        assert_eq!(d.total_bytes, 10_000);
        assert_eq!(d.used_bytes, 6_000);
    }

    #[test]
    fn first_disk_when_nothing_is_mounted_at_root() {
        let mounts = [(Path::new("C:\\"), 500, 100), (Path::new("D:\\"), 900, 900)];
        assert_eq!(
            root_disk(mounts),
            Some(DiskSample {
                total_bytes: 500,
                used_bytes: 400
            })
        );
        assert_eq!(root_disk(std::iter::empty()), None);
    }

    #[test]
    fn available_above_total_never_underflows() {
        let d = root_disk([(Path::new("/"), 100, 150)]).unwrap();
        assert_eq!(d.used_bytes, 0);
    }

    #[test]
    fn network_rate_sums_non_loopback_deltas_over_elapsed() {
        let ifaces = [("eth0", 4_096, 1_024), ("lo", 1_000_000, 1_000_000), ("wlan0", 2_048, 0)];
        let n = network_rate(ifaces, 2.0).unwrap();
        assert_eq!(n.rx_bytes_per_sec, 3_072.0);
        assert_eq!(n.tx_bytes_per_sec, 512.0);
    }

    #[test]
    fn network_rate_with_no_elapsed_time_is_zero() {
        let n = network_rate([("eth0", 4_096, 1_024)], 0.0).unwrap();
        assert_eq!(n.rx_bytes_per_sec, 0.0);
        assert_eq!(n.tx_bytes_per_sec, 0.0);
    }

    #[test]
    fn network_rate_needs_a_real_interface() {
        assert!(matches!(
            network_rate([("lo", 10, 10)], 1.0),
            Err(SourceError::NoData("network"))
        ));
    }

    #[test]
    fn busy_handle_is_reported_not_waited_on() {
        let m = Mutex::new(0u32);
        let held = m.lock().unwrap();
        assert!(matches!(
            claim("disk", &m),
            Err(SourceError::Task { subsystem: "disk", .. })
        ));
        drop(held);
        assert!(claim("disk", &m).is_ok());
    }

    #[tokio::test]
    async fn memory_does_not_wait_on_a_busy_cpu_handle() {
        let src = SysinfoSource::new();
        let held = src.cpu.lock().unwrap();
        let mem = src.memory().await.expect("memory sample while cpu is busy");
        assert!(mem.total_bytes > 0);
        assert!(matches!(
            src.cpu().await,
            Err(SourceError::Task { subsystem: "cpu", .. })
        ));
        drop(held);
    }

    #[tokio::test]
    async fn sysinfo_source_reports_memory_and_cores() {
        let src = SysinfoSource::new();
        assert!(!src.hostname().is_empty());
        let mem = src.memory().await.expect("memory sample");
        assert!(mem.total_bytes > 0);
        assert!(mem.used_bytes <= mem.total_bytes);
        let cpu = src.cpu().await.expect("cpu sample");
        assert!(cpu.cores >= 1);
        assert!((0.0..=100.0).contains(&cpu.load_pct));
    }
}

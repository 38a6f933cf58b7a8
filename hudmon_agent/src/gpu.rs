//! GPU readings. The vendor tool (`nvidia-smi`) is tried first because it is
//! the only source of utilization, temperature and power draw; when it is
//! missing, fails, or times out the generic inventory (`gfxinfo`) supplies
//! model, vendor and VRAM, and the live fields are reported as unavailable.

use futures::future::BoxFuture;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::format::{celsius, gigabytes, mebibytes_as_gigabytes, percent, watts};
use crate::reading::Reading;
use crate::types::GpuReading;

pub const DEFAULT_VENDOR_TIMEOUT: Duration = Duration::from_secs(2);

const NVIDIA_SMI: &str = "nvidia-smi";
const NVIDIA_SMI_ARGS: [&str; 2] = [
    "--query-gpu=name,memory.total,utilization.gpu,temperature.gpu,power.draw",
    "--format=csv,noheader,nounits",
];
const INVENTORY: &str = "gfxinfo";
const NVIDIA_VENDOR: &str = "NVIDIA Corporation";
const QUERY_FIELDS: usize = 5;

// Log the first unexpected vendor-tool failure, then every Nth in a row.
const WARN_EVERY: u64 = 300;

#[derive(Debug, Error)]
pub enum GpuQueryError {
    #[error("`{cmd}` timed out after {timeout_ms}ms")]
    Timeout { cmd: String, timeout_ms: u128 },

    #[error("failed to execute `{cmd}`: {source}")]
    Spawn { cmd: String, source: io::Error },

    #[error("`{cmd}` exited with {status}: {stderr}")]
    NonZeroExit {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("vendor tool reported no devices")]
    Empty,

    #[error("expected {expected} comma-separated fields, got {got}: \"{line}\"")]
    BadLine {
        expected: usize,
        got: usize,
        line: String,
    },

    #[error("hardware inventory unavailable: {0}")]
    Inventory(String),
}

impl GpuQueryError {
    /// Timeouts and a missing tool are normal on many hosts; they only trigger the fallback.
    pub fn is_expected(&self) -> bool {
        match self {
            GpuQueryError::Timeout { .. } => true,
            GpuQueryError::Spawn { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// A device as described by the generic hardware inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryGpu {
    pub model: String,
    pub vendor: String,
    pub vram_bytes: Option<u64>,
}

/// The two GPU data sources, behind one seam so tests never spawn processes.
pub trait GpuProbe: Send + Sync {
    /// Raw stdout of the vendor query tool.
    fn vendor_query(&self) -> BoxFuture<'_, Result<String, GpuQueryError>>;
    fn inventory(&self) -> BoxFuture<'_, Result<Vec<InventoryGpu>, GpuQueryError>>;
}

pub struct SystemGpuProbe {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SystemGpuProbe {
    pub fn new(timeout: Duration) -> Self {
        Self::with_command(NVIDIA_SMI, NVIDIA_SMI_ARGS, timeout)
    }

    pub fn with_command<I, S>(program: &str, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    async fn run(&self) -> Result<String, GpuQueryError> {
        let cmd = self.program.clone();
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GpuQueryError::Spawn {
                cmd: cmd.clone(),
                source,
            })?;

        // On timeout the wait future is dropped and kill_on_drop reaps the child.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => Err(GpuQueryError::NonZeroExit {
                cmd,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }),
            Ok(Err(source)) => Err(GpuQueryError::Spawn { cmd, source }),
            Err(_) => Err(GpuQueryError::Timeout {
                cmd,
                timeout_ms: self.timeout.as_millis(),
            }),
        }
    }
}

fn inventory_blocking() -> Result<Vec<InventoryGpu>, String> {
    let gpu = gfxinfo::active_gpu().map_err(|e| e.to_string())?;
    let total = gpu.info().total_vram();
    Ok(vec![InventoryGpu {
        model: gpu.model().to_string(),
        vendor: gpu.vendor().to_string(),
        vram_bytes: (total > 0).then_some(total),
    }])
}

impl GpuProbe for SystemGpuProbe {
    fn vendor_query(&self) -> BoxFuture<'_, Result<String, GpuQueryError>> {
        Box::pin(self.run())
    }

    fn inventory(&self) -> BoxFuture<'_, Result<Vec<InventoryGpu>, GpuQueryError>> {
        Box::pin(async {
            // gfxinfo can stall inside a wedged driver; the blocking thread is left behind.
            match tokio::time::timeout(self.timeout, tokio::task::spawn_blocking(inventory_blocking)).await {
                Ok(joined) => joined
                    .map_err(|e| GpuQueryError::Inventory(e.to_string()))?
                    .map_err(GpuQueryError::Inventory),
                Err(_) => Err(GpuQueryError::Timeout {
                    cmd: INVENTORY.to_string(),
                    timeout_ms: self.timeout.as_millis(),
                }),
            }
        })
    }
}

fn field(raw: &str, render: fn(f64) -> Reading) -> Reading {
    raw.parse::<f64>().map(render).unwrap_or(Reading::Unavailable)
}

/// Parse `name, memory.total, utilization.gpu, temperature.gpu, power.draw`
/// lines (no header, no units), one line per device. Fields the tool cannot
/// report (`[N/A]`, `[Not Supported]`) become unavailable.
pub fn parse_vendor_output(stdout: &str) -> Result<Vec<GpuReading>, GpuQueryError> {
    let mut gpus = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < QUERY_FIELDS {
            return Err(GpuQueryError::BadLine {
                expected: QUERY_FIELDS,
                got: fields.len(),
                line: line.to_string(),
            });
        }
        gpus.push(GpuReading {
            model: fields[0].to_string(),
            vendor: NVIDIA_VENDOR.to_string(),
            vram: field(fields[1], mebibytes_as_gigabytes),
            utilization: field(fields[2], percent),
            temperature: field(fields[3], celsius),
            power_draw: field(fields[4], watts),
        });
    }
    if gpus.is_empty() {
        return Err(GpuQueryError::Empty);
    }
    Ok(gpus)
}

/// Map inventory devices to the common reading shape. The inventory cannot
/// see live load, so those fields are always unavailable.
pub fn inventory_readings(devices: Vec<InventoryGpu>) -> Vec<GpuReading> {
    devices
        .into_iter()
        .map(|d| GpuReading {
            model: d.model,
            vendor: d.vendor,
            vram: d.vram_bytes.map(gigabytes).unwrap_or(Reading::Unavailable),
            utilization: Reading::Unavailable,
            temperature: Reading::Unavailable,
            power_draw: Reading::Unavailable,
        })
        .collect()
}

/// GPU adapter. `collect` never fails; the worst case is an empty list.
pub struct GpuCollector {
    probe: Option<Arc<dyn GpuProbe>>,
    consecutive_failures: AtomicU64,
}

impl GpuCollector {
    pub fn new(probe: Arc<dyn GpuProbe>) -> Self {
        Self {
            probe: Some(probe),
            consecutive_failures: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self {
            probe: None,
            consecutive_failures: AtomicU64::new(0),
        }
    }

    pub async fn collect(&self) -> Vec<GpuReading> {
        let Some(probe) = self.probe.as_deref() else {
            return Vec::new();
        };
        let primary = match probe.vendor_query().await {
            Ok(out) => parse_vendor_output(&out),
            Err(e) => Err(e),
        };
        match primary {
            Ok(gpus) => {
                let failed = self.consecutive_failures.swap(0, Ordering::Relaxed);
                if failed > 0 {
                    info!(after = failed, "nvidia-smi recovered");
                }
                gpus
            }
            Err(e) => {
                self.note_failure(&e);
                match probe.inventory().await {
                    Ok(devices) => inventory_readings(devices),
                    Err(e) => {
                        debug!(error = %e, "no GPU information available");
                        Vec::new()
                    }
                }
            }
        }
    }

    fn note_failure(&self, e: &GpuQueryError) {
        let n = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if e.is_expected() {
            debug!(error = %e, "vendor GPU query unavailable; using hardware inventory");
        } else if n == 1 || n % WARN_EVERY == 0 {
            warn!(failures = n, error = %e, "nvidia-smi failed; using hardware inventory");
        }
    }
}

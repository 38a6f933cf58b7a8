//! Snapshot assembly: query every source at once, then merge.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::format::{gigabytes, kilobytes_per_sec, percent, ratio_percent};
use crate::gpu::{GpuCollector, DEFAULT_VENDOR_TIMEOUT};
use crate::metrics::{MetricSource, SourceError};
use crate::reading::Reading;
use crate::types::{CpuReading, DiskReading, NetworkReading, RamReading, Snapshot};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("metric source unreachable: {0}")]
    Unreachable(String),

    #[error("every metric source failed this tick")]
    AllSourcesFailed,

    #[error("could not stamp snapshot: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Longest a single host metric query may take before its fields go N/A.
pub const DEFAULT_SOURCE_BUDGET: Duration = Duration::from_secs(3);

/// Room for the vendor tool to time out and the inventory to answer after it.
pub fn gpu_budget(vendor_timeout: Duration) -> Duration {
    vendor_timeout * 2 + Duration::from_secs(1)
}

pub struct Assembler {
    source: Arc<dyn MetricSource>,
    gpus: GpuCollector,
    source_budget: Duration,
    gpu_budget: Duration,
}

async fn bounded<T>(
    subsystem: &'static str,
    budget: Duration,
    query: BoxFuture<'_, Result<T, SourceError>>,
) -> Result<T, SourceError> {
    match timeout(budget, query).await {
        Ok(r) => r,
        Err(_) => {
            warn!(subsystem, budget_ms = budget.as_millis() as u64, "metric query timed out");
            Err(SourceError::Task {
                subsystem,
                reason: format!("no answer within {}ms", budget.as_millis()),
            })
        }
    }
}

// Field-level failure: log it and let the caller substitute N/A.
fn degrade<T>(subsystem: &'static str, r: Result<T, SourceError>) -> Option<T> {
    match r {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(subsystem, error = %e, "reading unavailable this tick");
            None
        }
    }
}

impl Assembler {
    pub fn new(source: Arc<dyn MetricSource>, gpus: GpuCollector) -> Self {
        Self {
            source,
            gpus,
            source_budget: DEFAULT_SOURCE_BUDGET,
            gpu_budget: gpu_budget(DEFAULT_VENDOR_TIMEOUT),
        }
    }

    /// Per-query time limits. A query past its limit is abandoned for this tick.
    pub fn with_budgets(mut self, source: Duration, gpu: Duration) -> Self {
        self.source_budget = source;
        self.gpu_budget = gpu;
        self
    }

    /// Build one snapshot. Individual subsystem failures become `N/A` fields;
    /// only a fault of the whole metric layer fails the call.
    pub async fn assemble(&self) -> Result<Snapshot, AssemblyError> {
        let budget = self.source_budget;
        let (cpu, mem, disk, net, gpu) = tokio::join!(
            bounded("cpu", budget, self.source.cpu()),
            bounded("memory", budget, self.source.memory()),
            bounded("disk", budget, self.source.disk()),
            bounded("network", budget, self.source.network()),
            async {
                timeout(self.gpu_budget, self.gpus.collect())
                    .await
                    .unwrap_or_else(|_| {
                        warn!(budget_ms = self.gpu_budget.as_millis() as u64, "GPU collection timed out");
                        Vec::new()
                    })
            },
        );

        let errors = [
            cpu.as_ref().err(),
            mem.as_ref().err(),
            disk.as_ref().err(),
            net.as_ref().err(),
        ];
        if let Some(SourceError::Unreachable(why)) = errors
            .iter()
            .flatten()
            .find(|e| matches!(e, SourceError::Unreachable(_)))
        {
            return Err(AssemblyError::Unreachable(why.clone()));
        }
        if errors.iter().all(Option::is_some) {
            return Err(AssemblyError::AllSourcesFailed);
        }

        let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;

        let cpu = degrade("cpu", cpu);
        let mem = degrade("memory", mem);
        let disk = degrade("disk", disk);
        let net = degrade("network", net);

        Ok(Snapshot {
            timestamp,
            hostname: self.source.hostname(),
            cpu: CpuReading {
                load: cpu.map(|c| percent(c.load_pct)).unwrap_or_default(),
                cores: cpu.map(|c| Reading::Count(c.cores as u64)).unwrap_or_default(),
            },
            ram: RamReading {
                total: mem.map(|m| gigabytes(m.total_bytes)).unwrap_or_default(),
                used: mem.map(|m| gigabytes(m.used_bytes)).unwrap_or_default(),
                usage: mem
                    .map(|m| ratio_percent(m.used_bytes, m.total_bytes))
                    .unwrap_or_default(),
            },
            gpu,
            network: NetworkReading {
                rx_sec: net.map(|n| kilobytes_per_sec(n.rx_bytes_per_sec)).unwrap_or_default(),
                tx_sec: net.map(|n| kilobytes_per_sec(n.tx_bytes_per_sec)).unwrap_or_default(),
            },
            disk: DiskReading {
                usage: disk
                    .map(|d| ratio_percent(d.used_bytes, d.total_bytes))
                    .unwrap_or_default(),
                total: disk.map(|d| gigabytes(d.total_bytes)).unwrap_or_default(),
                used: disk.map(|d| gigabytes(d.used_bytes)).unwrap_or_default(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::fakes::FakeProbe;
    use crate::gpu::{GpuProbe, GpuQueryError, InventoryGpu};
    use crate::metrics::fakes::{FakeSource, Script, GIB};
    use crate::metrics::{CpuSample, DiskSample, MemorySample, NetworkSample};
    use futures::future::BoxFuture;

    fn assembler(source: FakeSource) -> Assembler {
        Assembler::new(
            Arc::new(source),
            GpuCollector::new(Arc::new(FakeProbe::intel_only())),
        )
    }

    struct FixedSource;

    impl MetricSource for FixedSource {
        fn hostname(&self) -> String {
            "box".into()
        }
        fn cpu(&self) -> BoxFuture<'_, Result<CpuSample, SourceError>> {
            Box::pin(async {
                Ok(CpuSample {
                    load_pct: 50.5,
                    cores: 8,
                })
            })
        }
        fn memory(&self) -> BoxFuture<'_, Result<MemorySample, SourceError>> {
            Box::pin(async {
                Ok(MemorySample {
                    total_bytes: 16 * GIB,
                    used_bytes: 8 * GIB,
                })
            })
        }
        fn disk(&self) -> BoxFuture<'_, Result<DiskSample, SourceError>> {
            Box::pin(async { Err(SourceError::NoData("disk")) })
        }
        fn network(&self) -> BoxFuture<'_, Result<NetworkSample, SourceError>> {
            Box::pin(async {
                Ok(NetworkSample {
                    rx_bytes_per_sec: 1536.0,
                    tx_bytes_per_sec: 0.0,
                })
            })
        }
    }

    #[tokio::test]
    async fn formats_cpu_and_memory_readings() {
        let a = Assembler::new(Arc::new(FixedSource), GpuCollector::disabled());
        let s = a.assemble().await.unwrap();
        assert_eq!(s.hostname, "box");
        assert_eq!(s.cpu.load, Reading::text("50.5"));
        assert_eq!(s.cpu.cores, Reading::Count(8));
        assert_eq!(s.ram.usage, Reading::text("50.0"));
        assert_eq!(s.ram.total, Reading::text("16.00 GB"));
        assert_eq!(s.ram.used, Reading::text("8.00 GB"));
        assert_eq!(s.network.rx_sec, Reading::text("1.5"));
        assert_eq!(s.network.tx_sec, Reading::text("0.0"));
        assert!(s.gpu.is_empty());
        assert!(OffsetDateTime::parse(&s.timestamp, &Rfc3339).is_ok());
    }

    #[tokio::test]
    async fn one_failed_subsystem_only_blanks_its_fields() {
        let a = Assembler::new(Arc::new(FixedSource), GpuCollector::disabled());
        let s = a.assemble().await.unwrap();
        assert_eq!(s.disk.usage, Reading::Unavailable);
        assert_eq!(s.disk.total, Reading::Unavailable);
        assert_eq!(s.disk.used, Reading::Unavailable);

        let s = assembler(FakeSource::scripted(|_| Script::CpuFails))
            .assemble()
            .await
            .unwrap();
        assert_eq!(s.cpu.load, Reading::Unavailable);
        assert_eq!(s.cpu.cores, Reading::Unavailable);
        assert_eq!(s.ram.usage, Reading::text("50.0"));
        assert_eq!(s.disk.usage, Reading::text("40.0"));
    }

    #[tokio::test]
    async fn gpu_fallback_flows_into_snapshot() {
        let s = assembler(FakeSource::healthy()).assemble().await.unwrap();
        assert_eq!(s.gpu.len(), 1);
        assert_eq!(s.gpu[0].vendor, "Intel");
        assert_eq!(s.gpu[0].utilization, Reading::Unavailable);
    }

    struct HangingProbe;

    impl GpuProbe for HangingProbe {
        fn vendor_query(&self) -> BoxFuture<'_, Result<String, GpuQueryError>> {
            Box::pin(std::future::pending())
        }
        fn inventory(&self) -> BoxFuture<'_, Result<Vec<InventoryGpu>, GpuQueryError>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_disk_query_only_blanks_disk() {
        let a = assembler(FakeSource::scripted(|_| Script::DiskHangs));
        let started = tokio::time::Instant::now();
        let s = a.assemble().await.unwrap();
        assert!(started.elapsed() <= DEFAULT_SOURCE_BUDGET + Duration::from_millis(10));
        assert_eq!(s.disk.usage, Reading::Unavailable);
        assert_eq!(s.disk.total, Reading::Unavailable);
        assert_eq!(s.cpu.load, Reading::text("1.0"));
        assert_eq!(s.ram.usage, Reading::text("50.0"));
        assert_eq!(s.gpu.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_gpu_probe_yields_no_devices() {
        let a = Assembler::new(
            Arc::new(FakeSource::healthy()),
            GpuCollector::new(Arc::new(HangingProbe)),
        )
        .with_budgets(Duration::from_secs(1), Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        let s = a.assemble().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(s.gpu.is_empty());
        assert_eq!(s.disk.usage, Reading::text("40.0"));
    }

    #[test]
    fn gpu_budget_outlasts_the_vendor_timeout() {
        assert!(gpu_budget(DEFAULT_VENDOR_TIMEOUT) > DEFAULT_VENDOR_TIMEOUT * 2);
    }

    #[tokio::test]
    async fn total_failure_is_a_distinct_error() {
        let err = assembler(FakeSource::scripted(|_| Script::AllFail))
            .assemble()
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::AllSourcesFailed));

        let err = assembler(FakeSource::scripted(|_| Script::Unreachable))
            .assemble()
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Unreachable(_)));
    }
}

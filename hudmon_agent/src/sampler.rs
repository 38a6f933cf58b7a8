//! Background sampler: one task, one tick at a time. Each tick assembles a
//! snapshot and hands it to the hub; a failed tick becomes an error broadcast
//! and the schedule carries on.

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::assembler::Assembler;
use crate::hub::BroadcastHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Recorded { delivered: usize },
    Failed,
}

const FAILURE_MESSAGE: &str = "unable to read system information";

pub async fn run_tick(assembler: &Assembler, hub: &BroadcastHub) -> TickOutcome {
    let reason = match assembler.assemble().await {
        Ok(snapshot) => match hub.on_tick(snapshot) {
            Ok(delivered) => return TickOutcome::Recorded { delivered },
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };
    warn!(error = %reason, "tick failed");
    hub.on_assembly_failure(&format!("{FAILURE_MESSAGE}: {reason}"));
    TickOutcome::Failed
}

// Ticks are awaited in sequence, so assembly and broadcast never overlap and
// history stays in tick order. A slow tick delays the next one instead of
// bunching up missed ticks.
pub fn spawn_sampler(assembler: Assembler, hub: BroadcastHub, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(period_ms = period.as_millis() as u64, "sampler started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_tick(&assembler, &hub).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::fakes::FakeProbe;
    use crate::gpu::GpuCollector;
    use crate::metrics::fakes::{FakeSource, Script};
    use serde_json::Value;
    use std::sync::Arc;

    fn assembler(source: FakeSource) -> Assembler {
        Assembler::new(
            Arc::new(source),
            GpuCollector::new(Arc::new(FakeProbe::intel_only())),
        )
    }

    fn kinds(session: &mut crate::hub::ViewerSession) -> Vec<String> {
        std::iter::from_fn(|| session.try_recv())
            .map(|f| {
                let v: Value = serde_json::from_str(&f).unwrap();
                v["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn failed_tick_broadcasts_error_and_leaves_history_alone() {
        let hub = BroadcastHub::new(10);
        let a = assembler(FakeSource::scripted(|n| {
            if n == 2 {
                Script::AllFail
            } else {
                Script::Healthy
            }
        }));
        let mut viewer = hub.on_connect().unwrap();

        assert_eq!(run_tick(&a, &hub).await, TickOutcome::Recorded { delivered: 1 });
        assert_eq!(hub.history_len(), 1);
        assert_eq!(run_tick(&a, &hub).await, TickOutcome::Failed);
        assert_eq!(hub.history_len(), 1);
        assert_eq!(run_tick(&a, &hub).await, TickOutcome::Recorded { delivered: 1 });
        assert_eq!(hub.history_len(), 2);

        assert_eq!(kinds(&mut viewer), vec!["history", "update", "error", "update"]);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_survives_failures() {
        let hub = BroadcastHub::new(100);
        // every third tick fails
        let a = assembler(FakeSource::scripted(|n| {
            if n % 3 == 0 {
                Script::Unreachable
            } else {
                Script::Healthy
            }
        }));
        let mut viewer = hub.on_connect().unwrap();
        let handle = spawn_sampler(a, hub.clone(), Duration::from_secs(1));

        // ticks fire at t = 0, 1, ..., 8
        tokio::time::sleep(Duration::from_millis(8_500)).await;
        handle.abort();

        assert_eq!(hub.history_len(), 6);
        let seen = kinds(&mut viewer);
        assert_eq!(seen.len(), 10);
        assert_eq!(seen.iter().filter(|k| *k == "error").count(), 3);
        assert_eq!(seen.iter().filter(|k| *k == "update").count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_in_tick_order_and_capped() {
        let hub = BroadcastHub::new(5);
        let handle = spawn_sampler(
            assembler(FakeSource::healthy()),
            hub.clone(),
            Duration::from_millis(1000),
        );
        tokio::time::sleep(Duration::from_millis(6_500)).await;
        handle.abort();

        let loads: Vec<String> = hub
            .history()
            .iter()
            .map(|s| s.cpu.load.to_string())
            .collect();
        assert_eq!(loads, vec!["3.0", "4.0", "5.0", "6.0", "7.0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_source_does_not_stall_the_schedule() {
        let hub = BroadcastHub::new(100);
        let handle = spawn_sampler(
            assembler(FakeSource::scripted(|_| Script::DiskHangs)),
            hub.clone(),
            Duration::from_secs(1),
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.abort();

        let history = hub.history();
        // each tick waits out the disk budget, then carries on
        assert!(history.len() >= 10, "only {} ticks recorded", history.len());
        for s in &history {
            assert!(!s.disk.usage.is_available());
            assert!(s.cpu.load.is_available());
        }
    }
}

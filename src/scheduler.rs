// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::ResponseCache;
use crate::pipeline::Aggregator;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval_secs: u64,
}

/// Spawn a background task that runs one aggregation cycle per interval and
/// drops the API cache afterwards. Returns `None` when the interval is 0.
/// The first cycle runs one full interval after startup.
pub fn spawn_update_scheduler(
    cfg: SchedulerCfg,
    aggregator: Arc<Aggregator>,
    cache: Arc<ResponseCache>,
) -> Option<JoinHandle<()>> {
    if cfg.interval_secs == 0 {
        return None;
    }
    let period = Duration::from_secs(cfg.interval_secs);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = aggregator.run_cycle().await;
            cache.clear().await;

            counter!("scheduler_runs_total").increment(1);
            gauge!("scheduler_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

            tracing::info!(
                target: "scheduler",
                status = ?report.status,
                total = report.bundle.total(),
                "scheduled update tick"
            );
        }
    }))
}

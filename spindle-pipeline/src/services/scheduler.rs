//! In-process timers for the scheduled stages
//!
//! Promotion and the sequential processor run on fixed intervals until the
//! shutdown token fires. A tick that finds the previous run still going
//! waits for it rather than overlapping.

use spindle_common::config::SchedulerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::promotion::PromotionStage;
use super::sequential::SequentialProcessor;
use crate::config::clamp_batch_size;

pub struct PipelineScheduler {
    promotion: Arc<PromotionStage>,
    sequential: Arc<SequentialProcessor>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
}

impl PipelineScheduler {
    pub fn new(
        promotion: Arc<PromotionStage>,
        sequential: Arc<SequentialProcessor>,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            promotion,
            sequential,
            config,
            shutdown,
        }
    }

    /// Spawn one task per timer
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let batch_size = clamp_batch_size(Some(self.config.promotion_batch_size), 10);

        tracing::info!(
            promotion_interval_secs = self.config.promotion_interval_secs,
            promotion_batch_size = batch_size,
            import_interval_secs = self.config.import_interval_secs,
            "Pipeline scheduler started"
        );

        let promotion = Arc::clone(&self.promotion);
        let promotion_task = spawn_timer(
            "promotion",
            Duration::from_secs(self.config.promotion_interval_secs.max(1)),
            self.shutdown.clone(),
            move || {
                let promotion = Arc::clone(&promotion);
                async move {
                    if let Err(e) = promotion.run(batch_size).await {
                        tracing::error!(error = %e, "Scheduled promotion failed");
                    }
                }
            },
        );

        let sequential = Arc::clone(&self.sequential);
        let import_task = spawn_timer(
            "import_queue",
            Duration::from_secs(self.config.import_interval_secs.max(1)),
            self.shutdown.clone(),
            move || {
                let sequential = Arc::clone(&sequential);
                async move {
                    match sequential.process_next().await {
                        Ok(outcome) => tracing::debug!(outcome = ?outcome, "Scheduled import pass"),
                        Err(e) => tracing::error!(error = %e, "Scheduled import pass failed"),
                    }
                }
            },
        );

        vec![promotion_task, import_task]
    }
}

fn spawn_timer<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(timer = name, "Scheduler timer stopped");
                    break;
                }
                _ = interval.tick() => {
                    tracing::debug!(timer = name, "Scheduler tick");
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::info!(timer = name, "Scheduler timer stopped mid-run");
                            break;
                        }
                        _ = tick() => {}
                    }
                }
            }
        }
    })
}

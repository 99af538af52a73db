//! Auto-quench sweeper
//!
//! Flasks left in the quenching queue are posted automatically once their
//! quench time has passed by `cutover_delay`. The sweeper goes through
//! `PipelineEngine::post_stage` like any operator, posting as `system`, so
//! the usual claim, postings and events apply. A flask an operator posts
//! first surfaces here as `StageMismatch` and is skipped.

use crate::engine::{PipelineEngine, StagePayload, StagePost};
use crate::error::{Error, Result};
use crate::queue::{list_at_stage_as_of, QueueFilter};
use crate::utils::retry_on_busy;
use chrono::{DateTime, Utc};
use foundry_common::config::AutoQuenchConfig;
use foundry_common::Stage;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// `posted_by` recorded for automatic posts
pub const SYSTEM_POSTER: &str = "system";

/// Delay before the first sweep, so startup logging settles
const STARTUP_DELAY: Duration = Duration::from_secs(2);

pub struct AutoQuench {
    engine: Arc<PipelineEngine>,
    poll_interval: Duration,
    cutover_delay: chrono::Duration,
    max_retry_wait: Duration,
}

impl AutoQuench {
    pub fn new(engine: Arc<PipelineEngine>, config: &AutoQuenchConfig) -> Self {
        let max_retry_wait = engine.settings().transaction_timeout;
        Self {
            engine,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            cutover_delay: chrono::Duration::seconds(config.cutover_delay_secs as i64),
            max_retry_wait,
        }
    }

    /// Flasks whose quench finished at least `cutover_delay` before `now`
    pub async fn due_at(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let queue = list_at_stage_as_of(self.engine.pool(), Stage::Quenching, &QueueFilter::default(), now).await?;

        Ok(queue
            .into_iter()
            .filter(|entry| {
                entry
                    .ready_at
                    .is_some_and(|ready_at| ready_at + self.cutover_delay <= now)
            })
            .map(|entry| entry.id)
            .collect())
    }

    /// Post quenching for every due flask; returns how many were advanced
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.due_at(now).await?;
        let mut advanced = 0;

        for flask_id in due {
            let result = retry_on_busy("auto-quench", self.max_retry_wait, || {
                self.engine.post_stage(StagePost::new(
                    SYSTEM_POSTER,
                    StagePayload::Quenching { flask_id },
                ))
            })
            .await;

            match result {
                Ok(_) => {
                    advanced += 1;
                    info!(flask_id, "Auto-quenched flask");
                }
                Err(Error::StageMismatch { actual, .. }) => {
                    debug!(flask_id, actual = actual.as_str(), "Flask already moved on, skipping");
                }
                Err(e) => {
                    warn!(flask_id, error = %e, "Auto-quench failed for flask");
                }
            }
        }

        Ok(advanced)
    }

    pub async fn sweep_once(&self) -> Result<usize> {
        self.sweep_at(Utc::now()).await
    }

    /// Run the sweeper until the runtime shuts down
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            cutover_delay_secs = self.cutover_delay.num_seconds(),
            "Auto-quench sweeper started"
        );

        tokio::time::sleep(STARTUP_DELAY).await;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(0) => {}
                Ok(advanced) => debug!(advanced, "Auto-quench sweep complete"),
                Err(e) => error!(error = %e, "Auto-quench sweep failed"),
            }
        }
    }
}

//! Pipeline state machine
//!
//! `PipelineEngine::post_stage` is the only way a flask moves forward. One
//! post is one SQLite transaction:
//!
//! 1. static payload checks (no database access)
//! 2. waxing: insert the flask row; later stages: compare-and-set claim of
//!    the stage, which is also the transaction's first write
//! 3. derive the stage effect from the stored flask and metal
//! 4. write measurement columns, apply the ledger move, record the posting
//! 5. commit, then hand a `StageEvent` to the hub
//!
//! Steps 1 to 4 share one timestamp and run under the transaction timeout;
//! the commit does not. Any error before commit drops the transaction, which
//! rolls it back.

pub mod payload;

pub use payload::{EffectContext, LedgerMove, StageEffect, StagePayload, StagePost, StageRules};

use crate::db::flasks::{self, Flask};
use crate::db::ledger::{Ledger, Movement};
use crate::db::metals::{self, Metal};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use foundry_common::config::TomlConfig;
use foundry_common::{EventHub, Stage, StageEvent, StageEventType};
use serde_json::json;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Engine tuning
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Upper bound on one stage post, lock waits included
    pub transaction_timeout: Duration,
    pub rules: StageRules,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(10),
            rules: StageRules::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            transaction_timeout: Duration::from_millis(config.database.transaction_timeout_ms),
            rules: StageRules {
                supply_total_tolerance: config.supply.total_tolerance,
            },
        }
    }
}

/// Transactional flask state machine
pub struct PipelineEngine {
    pool: SqlitePool,
    hub: EventHub,
    settings: EngineSettings,
}

impl PipelineEngine {
    pub fn new(pool: SqlitePool, hub: EventHub, settings: EngineSettings) -> Self {
        info!(
            transaction_timeout_ms = settings.transaction_timeout.as_millis() as u64,
            supply_total_tolerance = ?settings.rules.supply_total_tolerance,
            "Pipeline engine initialized"
        );
        Self { pool, hub, settings }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Post one stage for one flask
    ///
    /// Returns the flask as committed. On any error nothing is written and
    /// no event is published. Errors are never retried here; `Busy` is the
    /// only one a caller may sensibly retry.
    pub async fn post_stage(&self, post: StagePost) -> Result<Flask> {
        let posted_by = post.posted_by.trim();
        if posted_by.is_empty() {
            return Err(Error::InvalidMeasurement("posted_by must not be blank".to_string()));
        }
        post.payload.validate()?;

        let stage = post.payload.stage();
        let deadline = self.settings.transaction_timeout;

        // The deadline bounds lock waits and statements up to the commit. The
        // commit itself runs outside it: once started, its outcome is the
        // outcome reported to the caller.
        let (tx, flask, summary) =
            match tokio::time::timeout(deadline, self.prepare(&post.payload, posted_by)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        stage = stage.as_str(),
                        flask_id = ?post.payload.flask_id(),
                        timeout_ms = deadline.as_millis() as u64,
                        "Stage post timed out, rolled back"
                    );
                    return Err(Error::Busy(format!(
                        "{} post did not complete within {} ms",
                        stage,
                        deadline.as_millis()
                    )));
                }
            };
        tx.commit().await?;

        info!(
            flask_id = flask.id,
            stage = stage.as_str(),
            next_stage = flask.current_stage.as_str(),
            posted_by,
            "Stage posted"
        );

        self.publish(stage, &flask, posted_by, summary);
        Ok(flask)
    }

    /// Everything up to the commit; returns the open transaction together
    /// with the flask as it will be committed
    async fn prepare(
        &self,
        payload: &StagePayload,
        posted_by: &str,
    ) -> Result<(Transaction<'static, Sqlite>, Flask, serde_json::Value)> {
        let now = Utc::now();
        let stage = payload.stage();

        let (mut tx, flask_id, metal, effect) = match payload {
            StagePayload::Waxing {
                production_date,
                flask_no,
                metal_id,
                ..
            } => {
                // Metals never change, so the lookup can precede the transaction
                let metal = metals::get_metal(&self.pool, *metal_id)
                    .await?
                    .ok_or(Error::UnknownMetal(*metal_id))?;
                let effect = payload.effect(&EffectContext {
                    flask: None,
                    metal: &metal,
                    rules: &self.settings.rules,
                    now,
                })?;

                let mut tx = self.pool.begin().await?;
                let flask_id =
                    flasks::insert_flask(&mut tx, *production_date, flask_no.trim(), metal.id, now).await?;
                (tx, flask_id, metal, effect)
            }
            _ => {
                let flask_id = payload
                    .flask_id()
                    .ok_or_else(|| Error::Internal(format!("{} payload without flask id", stage)))?;
                let next = stage
                    .next()
                    .ok_or_else(|| Error::Internal(format!("{} has no following stage", stage)))?;

                let mut tx = self.pool.begin().await?;
                flasks::claim_stage(&mut tx, flask_id, stage, next, now).await?;

                let flask = flasks::fetch_flask(&mut tx, flask_id)
                    .await?
                    .ok_or(Error::FlaskNotFound(flask_id))?;
                let metal = metals::fetch_metal(&mut tx, flask.metal_id).await?;
                let effect = payload.effect(&EffectContext {
                    flask: Some(&flask),
                    metal: &metal,
                    rules: &self.settings.rules,
                    now,
                })?;
                (tx, flask_id, metal, effect)
            }
        };

        let summary = self
            .apply_effect(&mut tx, flask_id, &metal, stage, posted_by, effect, now)
            .await?;

        let flask = flasks::fetch_flask(&mut tx, flask_id)
            .await?
            .ok_or(Error::FlaskNotFound(flask_id))?;

        Ok((tx, flask, summary))
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_effect(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        flask_id: i64,
        metal: &Metal,
        stage: Stage,
        posted_by: &str,
        effect: StageEffect,
        now: DateTime<Utc>,
    ) -> Result<serde_json::Value> {
        let mut summary = effect.summary;

        flasks::write_columns(tx, flask_id, &effect.columns).await?;

        if let Some(ledger_move) = effect.ledger {
            if ledger_move.delta != 0.0 {
                let qty_after = Ledger::adjust(
                    tx,
                    metal.id,
                    ledger_move.delta,
                    Movement {
                        source: ledger_move.source,
                        flask_id: Some(flask_id),
                        created_by: posted_by,
                    },
                )
                .await?;

                if let Some(fields) = summary.as_object_mut() {
                    fields.insert("reserve_qty_after".to_string(), json!(qty_after));
                }
            } else {
                debug!(flask_id, stage = stage.as_str(), "Zero ledger delta, reserve untouched");
            }
        }

        flasks::record_posting(tx, flask_id, stage, posted_by, now).await?;
        Ok(summary)
    }

    fn publish(&self, stage: Stage, flask: &Flask, posted_by: &str, summary: serde_json::Value) {
        let Some(event_type) = StageEventType::for_stage(stage) else {
            return;
        };

        self.hub.publish(StageEvent {
            event_type,
            flask_id: flask.id,
            stage,
            next_stage: flask.current_stage,
            posted_by: posted_by.to_string(),
            payload: summary,
            committed_at: Utc::now(),
        });
    }
}

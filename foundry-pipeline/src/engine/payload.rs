//! Stage payloads and their effects
//!
//! Each `StagePayload` variant carries the measurements one stage posts.
//! `effect` turns a payload into a `StageEffect` (flask columns to write,
//! an optional ledger move and the event summary) which the engine applies
//! the same way for every stage.

use crate::db::flasks::{ColumnWrite, Flask, FlaskColumn};
use crate::db::ledger::MovementSource;
use crate::db::metals::Metal;
use crate::error::{Error, Result};
use crate::formulas::{self, round3, CompositionRule};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use foundry_common::Stage;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Measurements for one stage post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum StagePayload {
    Waxing {
        production_date: NaiveDate,
        flask_no: String,
        metal_id: i64,
        gasket_weight: f64,
        tree_weight: f64,
    },
    Supply {
        flask_id: i64,
        scrap_supplied: f64,
        #[serde(default)]
        fine_24k_supplied: f64,
        #[serde(default)]
        alloy_supplied: f64,
    },
    Casting {
        flask_id: i64,
        /// Defaults to the metal's furnace temperature
        #[serde(default)]
        casting_temp: Option<f64>,
        /// Defaults to the metal's oven temperature
        #[serde(default)]
        oven_temp: Option<f64>,
    },
    Quenching {
        flask_id: i64,
    },
    Cutting {
        flask_id: i64,
        /// Tree weight before cutting (A)
        before_cut_weight: f64,
        /// Scrap recovered, returned to the reserve (B)
        after_scrap_weight: f64,
        /// Castings kept (C)
        after_casting_weight: f64,
    },
}

/// A stage post: who posted it and what
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePost {
    pub posted_by: String,
    #[serde(flatten)]
    pub payload: StagePayload,
}

impl StagePost {
    pub fn new(posted_by: impl Into<String>, payload: StagePayload) -> Self {
        Self {
            posted_by: posted_by.into(),
            payload,
        }
    }
}

/// Stage rules that vary by deployment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageRules {
    /// Fraction by which scrap + fine + alloy may miss the waxing metal
    /// weight at supply; `None` disables the check
    pub supply_total_tolerance: Option<f64>,
}

/// Reserve change requested by a stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerMove {
    pub delta: f64,
    pub source: MovementSource,
}

/// What a validated stage post does to storage
#[derive(Debug, Clone, PartialEq)]
pub struct StageEffect {
    pub columns: Vec<ColumnWrite>,
    pub ledger: Option<LedgerMove>,
    /// Snapshot carried by the stage event
    pub summary: serde_json::Value,
}

/// Inputs available when computing an effect
pub struct EffectContext<'a> {
    /// Current flask row; `None` at waxing, before the flask exists
    pub flask: Option<&'a Flask>,
    pub metal: &'a Metal,
    pub rules: &'a StageRules,
    pub now: DateTime<Utc>,
}

fn measurement(name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(Error::InvalidMeasurement(format!("{} must be a number", name)));
    }
    if value < 0.0 {
        return Err(Error::InvalidMeasurement(format!(
            "{} must not be negative, got {}",
            name, value
        )));
    }
    Ok(round3(value))
}

fn temperature(name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::InvalidMeasurement(format!(
            "{} must be a positive temperature, got {}",
            name, value
        )));
    }
    Ok(round3(value))
}

impl StagePayload {
    /// Stage this payload posts
    pub fn stage(&self) -> Stage {
        match self {
            StagePayload::Waxing { .. } => Stage::Waxing,
            StagePayload::Supply { .. } => Stage::Supply,
            StagePayload::Casting { .. } => Stage::Casting,
            StagePayload::Quenching { .. } => Stage::Quenching,
            StagePayload::Cutting { .. } => Stage::Cutting,
        }
    }

    /// Target flask; `None` for waxing, which creates it
    pub fn flask_id(&self) -> Option<i64> {
        match self {
            StagePayload::Waxing { .. } => None,
            StagePayload::Supply { flask_id, .. }
            | StagePayload::Casting { flask_id, .. }
            | StagePayload::Quenching { flask_id }
            | StagePayload::Cutting { flask_id, .. } => Some(*flask_id),
        }
    }

    /// Checks that need no stored state
    pub fn validate(&self) -> Result<()> {
        match self {
            StagePayload::Waxing {
                flask_no,
                gasket_weight,
                tree_weight,
                ..
            } => {
                if flask_no.trim().is_empty() {
                    return Err(Error::InvalidMeasurement("flask_no must not be blank".to_string()));
                }
                let gasket = measurement("gasket_weight", *gasket_weight)?;
                let tree = measurement("tree_weight", *tree_weight)?;
                if tree < gasket {
                    return Err(Error::InvalidMeasurement(format!(
                        "tree_weight ({}) is less than gasket_weight ({})",
                        tree, gasket
                    )));
                }
            }
            StagePayload::Supply {
                scrap_supplied,
                fine_24k_supplied,
                alloy_supplied,
                ..
            } => {
                measurement("scrap_supplied", *scrap_supplied)?;
                measurement("fine_24k_supplied", *fine_24k_supplied)?;
                measurement("alloy_supplied", *alloy_supplied)?;
            }
            StagePayload::Casting {
                casting_temp,
                oven_temp,
                ..
            } => {
                if let Some(t) = casting_temp {
                    temperature("casting_temp", *t)?;
                }
                if let Some(t) = oven_temp {
                    temperature("oven_temp", *t)?;
                }
            }
            StagePayload::Quenching { .. } => {}
            StagePayload::Cutting {
                before_cut_weight,
                after_scrap_weight,
                after_casting_weight,
                ..
            } => {
                measurement("before_cut_weight", *before_cut_weight)?;
                measurement("after_scrap_weight", *after_scrap_weight)?;
                measurement("after_casting_weight", *after_casting_weight)?;
            }
        }
        Ok(())
    }

    /// Derive the stage's effect from the payload and stored state
    pub fn effect(&self, ctx: &EffectContext<'_>) -> Result<StageEffect> {
        self.validate()?;

        match self {
            StagePayload::Waxing {
                production_date,
                flask_no,
                metal_id,
                gasket_weight,
                tree_weight,
            } => {
                let gasket = round3(*gasket_weight);
                let tree = round3(*tree_weight);
                let metal_weight = formulas::metal_weight(gasket, tree, ctx.metal.conversion_factor);

                Ok(StageEffect {
                    columns: vec![
                        ColumnWrite::real(FlaskColumn::GasketWeight, gasket),
                        ColumnWrite::real(FlaskColumn::TreeWeight, tree),
                        ColumnWrite::real(FlaskColumn::MetalWeight, metal_weight),
                    ],
                    ledger: None,
                    summary: json!({
                        "production_date": production_date,
                        "flask_no": flask_no.trim(),
                        "metal_id": metal_id,
                        "gasket_weight": gasket,
                        "tree_weight": tree,
                        "metal_weight": metal_weight,
                    }),
                })
            }

            StagePayload::Supply {
                scrap_supplied,
                fine_24k_supplied,
                alloy_supplied,
                ..
            } => {
                let scrap = round3(*scrap_supplied);
                let fine = round3(*fine_24k_supplied);
                let alloy = round3(*alloy_supplied);
                let metal_name = ctx.metal.name.as_str();

                CompositionRule::for_metal(metal_name)
                    .check(metal_name, fine, alloy)
                    .map_err(Error::InvalidMeasurement)?;

                let fresh = round3(fine + alloy);
                let total = round3(scrap + fresh);

                if let Some(tolerance) = ctx.rules.supply_total_tolerance {
                    let required = ctx.flask.and_then(|f| f.metal_weight).unwrap_or(0.0);
                    if !formulas::within_total_tolerance(total, required, tolerance) {
                        return Err(Error::InvalidMeasurement(format!(
                            "total supplied ({:.3}) must be within ±{}% of required ({:.3})",
                            total,
                            tolerance * 100.0,
                            required
                        )));
                    }
                }

                Ok(StageEffect {
                    columns: vec![
                        ColumnWrite::real(FlaskColumn::ScrapSupplied, scrap),
                        ColumnWrite::real(FlaskColumn::Fine24kSupplied, fine),
                        ColumnWrite::real(FlaskColumn::AlloySupplied, alloy),
                        ColumnWrite::real(FlaskColumn::FreshSupplied, fresh),
                        ColumnWrite::real(FlaskColumn::TotalSupplied, total),
                    ],
                    ledger: Some(LedgerMove {
                        delta: -scrap,
                        source: MovementSource::SupplyConsume,
                    }),
                    summary: json!({
                        "scrap_supplied": scrap,
                        "fine_24k_supplied": fine,
                        "alloy_supplied": alloy,
                        "fresh_supplied": fresh,
                        "total_supplied": total,
                    }),
                })
            }

            StagePayload::Casting {
                casting_temp,
                oven_temp,
                ..
            } => {
                let metal_name = ctx.metal.name.as_str();
                let casting_temp = casting_temp
                    .map(round3)
                    .unwrap_or_else(|| formulas::casting_temp_for(metal_name));
                let oven_temp = oven_temp
                    .map(round3)
                    .unwrap_or_else(|| formulas::oven_temp_for(metal_name));
                let quenching_time_min = formulas::quenching_minutes_for(metal_name);
                let ready_at = ctx.now + Duration::minutes(quenching_time_min);

                Ok(StageEffect {
                    columns: vec![
                        ColumnWrite::real(FlaskColumn::CastingTemp, casting_temp),
                        ColumnWrite::real(FlaskColumn::OvenTemp, oven_temp),
                        ColumnWrite::integer(FlaskColumn::QuenchingTimeMin, quenching_time_min),
                        ColumnWrite::timestamp(FlaskColumn::ReadyAt, ready_at),
                    ],
                    ledger: None,
                    summary: json!({
                        "casting_temp": casting_temp,
                        "oven_temp": oven_temp,
                        "quenching_time_min": quenching_time_min,
                        "ready_at": ready_at,
                    }),
                })
            }

            StagePayload::Quenching { .. } => Ok(StageEffect {
                columns: Vec::new(),
                ledger: None,
                summary: json!({
                    "ready_at": ctx.flask.and_then(|f| f.ready_at),
                }),
            }),

            StagePayload::Cutting {
                before_cut_weight,
                after_scrap_weight,
                after_casting_weight,
                ..
            } => {
                let a = round3(*before_cut_weight);
                let b = round3(*after_scrap_weight);
                let c = round3(*after_casting_weight);
                let loss = round3(a - (b + c));

                Ok(StageEffect {
                    columns: vec![
                        ColumnWrite::real(FlaskColumn::BeforeCutWeight, a),
                        ColumnWrite::real(FlaskColumn::AfterScrapWeight, b),
                        ColumnWrite::real(FlaskColumn::AfterCastingWeight, c),
                        ColumnWrite::real(FlaskColumn::Loss, loss),
                    ],
                    ledger: Some(LedgerMove {
                        delta: b,
                        source: MovementSource::CuttingReturn,
                    }),
                    summary: json!({
                        "before_cut_weight": a,
                        "after_scrap_weight": b,
                        "after_casting_weight": c,
                        "loss": loss,
                    }),
                })
            }
        }
    }
}

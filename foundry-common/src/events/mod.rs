//! Stage events and the broadcast hub
//!
//! A `StageEvent` is produced once per committed stage transition and handed
//! to the `EventHub`, which fans it out to every active subscriber. Events are
//! never stored; a subscriber that is not connected when an event is
//! published never sees it.

mod hub;

pub use hub::{EventHub, Subscription, SubscriptionId};

use crate::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event tags, one per postable stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEventType {
    WaxingPosted,
    SupplyPosted,
    CastingPosted,
    QuenchingPosted,
    CuttingPosted,
}

impl StageEventType {
    /// Tag for a post of `stage`; `Complete` is never posted
    pub fn for_stage(stage: Stage) -> Option<Self> {
        match stage {
            Stage::Waxing => Some(Self::WaxingPosted),
            Stage::Supply => Some(Self::SupplyPosted),
            Stage::Casting => Some(Self::CastingPosted),
            Stage::Quenching => Some(Self::QuenchingPosted),
            Stage::Cutting => Some(Self::CuttingPosted),
            Stage::Complete => None,
        }
    }

    /// Get event type as string for SSE `event:` field and filtering
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaxingPosted => "waxing_posted",
            Self::SupplyPosted => "supply_posted",
            Self::CastingPosted => "casting_posted",
            Self::QuenchingPosted => "quenching_posted",
            Self::CuttingPosted => "cutting_posted",
        }
    }
}

/// Immutable description of one committed stage transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    /// `<stage>_posted` tag
    pub event_type: StageEventType,
    /// Flask that moved
    pub flask_id: i64,
    /// Stage that was posted
    pub stage: Stage,
    /// Stage the flask now waits at
    pub next_stage: Stage,
    /// Operator identity recorded with the post
    pub posted_by: String,
    /// Stage-specific fields as committed (weights, temperatures, ...)
    pub payload: serde_json::Value,
    /// Commit timestamp of the transition
    pub committed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_for_every_postable_stage() {
        for stage in Stage::ORDER {
            match StageEventType::for_stage(stage) {
                Some(tag) => assert_eq!(tag.as_str(), format!("{}_posted", stage.as_str())),
                None => assert_eq!(stage, Stage::Complete),
            }
        }
    }

    #[test]
    fn test_stage_event_serialization() {
        let event = StageEvent {
            event_type: StageEventType::SupplyPosted,
            flask_id: 7,
            stage: Stage::Supply,
            next_stage: Stage::Casting,
            posted_by: "melter-2".to_string(),
            payload: serde_json::json!({ "scrap_supplied": 5.0 }),
            committed_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "supply_posted");
        assert_eq!(json["stage"], "supply");
        assert_eq!(json["next_stage"], "casting");
        assert_eq!(json["payload"]["scrap_supplied"], 5.0);

        let back: StageEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.flask_id, 7);
        assert_eq!(back.event_type, StageEventType::SupplyPosted);
    }
}

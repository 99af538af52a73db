//! Production stage ordering
//!
//! A flask's stage names the *next* stage still to be performed: after a
//! waxing post the flask sits at `Supply`, after cutting it is `Complete`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One step of the fixed production sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Waxing,
    Supply,
    Casting,
    Quenching,
    Cutting,
    Complete,
}

impl Stage {
    /// Every stage in pipeline order
    pub const ORDER: [Stage; 6] = [
        Stage::Waxing,
        Stage::Supply,
        Stage::Casting,
        Stage::Quenching,
        Stage::Cutting,
        Stage::Complete,
    ];

    /// Stage that follows this one, `None` for `Complete`
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    /// Whether a flask at this stage can still be posted
    pub fn is_terminal(self) -> bool {
        self == Stage::Complete
    }

    /// Storage/wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Waxing => "waxing",
            Stage::Supply => "supply",
            Stage::Casting => "casting",
            Stage::Quenching => "quenching",
            Stage::Cutting => "cutting",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waxing" => Ok(Stage::Waxing),
            "supply" => Ok(Stage::Supply),
            "casting" => Ok(Stage::Casting),
            "quenching" => Ok(Stage::Quenching),
            "cutting" => Ok(Stage::Cutting),
            // Older floor terminals still say "done"
            "complete" | "done" => Ok(Stage::Complete),
            other => Err(Error::InvalidInput(format!("unknown stage '{}'", other))),
        }
    }
}

//! Shop-floor formulas
//!
//! Metal weight from wax weight, per-alloy casting and oven temperatures,
//! quench times and the fine:alloy composition rules applied at supply.
//! Alloy tables are keyed by substrings of the metal name ("14Y", "SILVER")
//! and checked in table order, first match wins.

/// Round to the 3 decimals every stored quantity carries
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Metal needed to fill a tree: `(tree − gasket) × conversion_factor`
///
/// Callers reject `tree < gasket` before calling.
pub fn metal_weight(gasket_weight: f64, tree_weight: f64, conversion_factor: f64) -> f64 {
    round3((tree_weight - gasket_weight) * conversion_factor)
}

/// Metal a whole tree will take, before the gasket is weighed off
pub fn est_metal_weight(tree_weight: f64, conversion_factor: f64) -> f64 {
    round3(tree_weight * conversion_factor)
}

const DEFAULT_CASTING_TEMP: f64 = 1000.0;
const DEFAULT_OVEN_TEMP: f64 = 1000.0;
const DEFAULT_QUENCH_MINUTES: i64 = 1;

const CASTING_TEMPS: &[(&str, f64)] = &[
    ("10", 1100.0),
    ("14W", 1050.0),
    ("14Y", 1030.0),
    ("14R", 1100.0),
    ("SILVER", 980.0),
    ("18W", 1050.0),
    ("18Y", 1060.0),
    ("18R", 1100.0),
    ("PLATINUM", 1000.0),
];

const OVEN_TEMPS: &[(&str, f64)] = &[
    ("10", 1100.0),
    ("14W", 1150.0),
    ("14Y", 1050.0),
    ("14R", 1050.0),
    ("SILVER", 980.0),
    ("18W", 1050.0),
    ("18Y", 1050.0),
    ("18R", 1020.0),
    ("PLATINUM", 1000.0),
];

const QUENCH_MINUTES: &[(&str, i64)] = &[
    ("10W", 15),
    ("10Y", 15),
    ("10R", 8),
    ("14W", 15),
    ("14Y", 15),
    ("14R", 7),
    ("SILVER", 15),
    ("18W", 15),
    ("18Y", 15),
    ("18R", 3),
    ("PLATINUM", 8),
];

fn lookup<T: Copy>(table: &[(&str, T)], metal_name: &str, default: T) -> T {
    let name = metal_name.to_ascii_uppercase();
    table
        .iter()
        .find(|(key, _)| name.contains(key))
        .map(|(_, value)| *value)
        .unwrap_or(default)
}

/// Furnace temperature (°C) used when the caster does not enter one
pub fn casting_temp_for(metal_name: &str) -> f64 {
    lookup(CASTING_TEMPS, metal_name, DEFAULT_CASTING_TEMP)
}

/// Flask oven temperature (°C) used when the caster does not enter one
pub fn oven_temp_for(metal_name: &str) -> f64 {
    lookup(OVEN_TEMPS, metal_name, DEFAULT_OVEN_TEMP)
}

/// Minutes a cast flask must cool before quenching
pub fn quenching_minutes_for(metal_name: &str) -> i64 {
    lookup(QUENCH_MINUTES, metal_name, DEFAULT_QUENCH_MINUTES)
}

/// Fresh-metal composition required for a metal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompositionRule {
    /// No constraint
    Free,
    /// Platinum and silver are cast without alloy
    PureOnly,
    /// Karat gold: fine 24k to alloy in a fixed ratio
    GoldRatio { fine: u32, alloy: u32 },
}

/// Relative tolerance on the fine fraction of fresh gold
pub const RATIO_TOLERANCE: f64 = 0.05;

/// Alloy allowed for pure-only metals (rounding noise)
const PURE_ALLOY_EPSILON: f64 = 1e-3;

impl CompositionRule {
    pub fn for_metal(metal_name: &str) -> Self {
        let name = metal_name.trim().to_ascii_lowercase();
        if name == "platinum" || name == "silver" {
            CompositionRule::PureOnly
        } else if name.starts_with("10") {
            CompositionRule::GoldRatio { fine: 5, alloy: 7 }
        } else if name.starts_with("14") {
            CompositionRule::GoldRatio { fine: 7, alloy: 5 }
        } else if name.starts_with("18") {
            CompositionRule::GoldRatio { fine: 3, alloy: 1 }
        } else {
            CompositionRule::Free
        }
    }

    /// Check fresh metal against the rule; the message explains the violation
    pub fn check(&self, metal_name: &str, fine: f64, alloy: f64) -> Result<(), String> {
        match *self {
            CompositionRule::Free => Ok(()),
            CompositionRule::PureOnly => {
                if alloy > PURE_ALLOY_EPSILON {
                    Err(format!("{} must have alloy = 0", metal_name))
                } else {
                    Ok(())
                }
            }
            CompositionRule::GoldRatio {
                fine: fine_parts,
                alloy: alloy_parts,
            } => {
                let fresh = fine + alloy;
                if fresh <= 0.0 {
                    // all scrap
                    return Ok(());
                }
                let expected = f64::from(fine_parts) / f64::from(fine_parts + alloy_parts);
                let actual = fine / fresh;
                if (actual - expected).abs() <= RATIO_TOLERANCE * expected {
                    Ok(())
                } else {
                    Err(format!(
                        "{}: fine:alloy must be {}:{} (±{}%)",
                        metal_name,
                        fine_parts,
                        alloy_parts,
                        RATIO_TOLERANCE * 100.0
                    ))
                }
            }
        }
    }
}

/// Whether `total` lies within `±tolerance` (fraction) of `required`
pub fn within_total_tolerance(total: f64, required: f64, tolerance: f64) -> bool {
    let lo = required * (1.0 - tolerance);
    let hi = required * (1.0 + tolerance);
    total >= lo - 1e-9 && total <= hi + 1e-9
}

//! Generation settings value object
//!
//! The numeric parameters of character creation. Hosts may override them
//! via configuration; the engine only ever reads them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    /// Starting build-point budget (GP).
    pub starting_budget: i64,
    /// Separate budget for attribute purchases.
    pub attribute_points: i64,
    /// Lowest value an attribute may be bought down to.
    pub attribute_min: i64,
    /// Highest value an attribute may be bought up to.
    pub attribute_max: i64,
    /// Cap on points gained from disadvantages.
    pub disadvantage_cap: i64,
    /// Cap on points gained from bad traits.
    pub bad_trait_cap: i64,
    /// Allowed deviation of rolled weight from the size-derived value, in percent.
    pub weight_deviation_percent: i64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            starting_budget: 110,
            attribute_points: 100,
            attribute_min: 8,
            attribute_max: 14,
            disadvantage_cap: 50,
            bad_trait_cap: 30,
            weight_deviation_percent: 15,
        }
    }
}

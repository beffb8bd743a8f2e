//! Cost curves
//!
//! The non-linear pricing rules shared by the deduplication engine and the
//! traits stage.

/// Total cost of a skill priced as if it were `times` ranks cheaper.
///
/// Follows the reciprocal-halving curve `base * (2 - 2^(1-N))`: each
/// additional stack contributes half of the previous one, approaching but
/// never reaching twice the base cost.
pub fn cheaper_skill_total(base: i64, times: u32) -> f64 {
    if times == 0 {
        return 0.0;
    }
    base as f64 * (2.0 - 2f64.powi(1 - times as i32))
}

/// Marginal contribution of the `times`-th stack.
pub fn cheaper_skill_marginal(base: i64, times: u32) -> f64 {
    cheaper_skill_total(base, times) - cheaper_skill_total(base, times.saturating_sub(1))
}

/// Cost of the stacks beyond the first `times - additional` ones, i.e. the
/// part the build itself must still pay for when `additional` stacks were
/// granted on top of an already-owned skill.
pub fn cheaper_skill_partial(base: i64, times: u32, additional: u32) -> f64 {
    cheaper_skill_total(base, times) - cheaper_skill_total(base, times - additional.min(times))
}

/// Cost of an exceptional-attribute advantage for `levels` points above the
/// racial maximum, given the advantage's per-level base cost.
pub fn exceptional_attribute_cost(base: i64, levels: i64) -> i64 {
    if levels <= 0 {
        return 0;
    }
    (base + levels - 1) * levels
}

/// Round a fractional cost to whole build points, half away from zero.
pub fn round_cost(cost: f64) -> i64 {
    cost.round() as i64
}

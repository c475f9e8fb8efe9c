// Proportional wheel-speed limiting
//
// If any module would exceed the attainable speed, every module is scaled by
// the same factor so direction and wheel-to-wheel ratios are preserved.

use super::state::{ModuleState, MODULE_COUNT};

/// Scale all speeds down so none exceeds `max_speed` in magnitude.
///
/// Angles are never touched. Speeds already within the bound are returned
/// unchanged. A non-positive or non-finite `max_speed` stops every wheel.
pub fn desaturate(
    states: &[ModuleState; MODULE_COUNT],
    max_speed: f64,
) -> [ModuleState; MODULE_COUNT] {
    if !(max_speed.is_finite() && max_speed > 0.0) {
        return states.map(|s| ModuleState::new(0.0, s.angle));
    }

    let peak = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);
    if peak <= max_speed {
        return *states;
    }

    let scale = max_speed / peak;
    states.map(|s| ModuleState::new(s.speed * scale, s.angle))
}

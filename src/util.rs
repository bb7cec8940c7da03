//! Small shared math helpers.

use core::f32::consts::{PI, TAU};

use num_traits::Float;

/// Wrap an angle to one turn centred on zero.
pub fn wrap_pm_pi(theta: f32) -> f32 {
    theta - TAU * ((theta + PI) / TAU).floor()
}

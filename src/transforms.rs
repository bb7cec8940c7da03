//! Stator-frame transforms and space-vector modulation.
//!
//! Conventions: the Clarke pair (α, β) is amplitude-invariant; Park rotates by
//! the electrical angle into the synchronous d/q frame. Modulation vectors are
//! normalised so 1.0 along a base vector is a full single-vector on-time,
//! which puts the linear (inscribed-circle) limit at √3/2.

use num_traits::Float;

pub const ONE_BY_SQRT3: f32 = 0.577_350_26;
pub const TWO_BY_SQRT3: f32 = 1.154_700_5;
pub const SQRT3_BY_2: f32 = 0.866_025_4;

/// Project the two measured phase currents to the stationary α/β frame.
/// Phase A is recovered as −(B + C) under the balanced assumption.
// todo: Flag a sustained winding-imbalance residual once the ADC layer
// reports all three phases.
pub fn clarke(ph_b: f32, ph_c: f32) -> (f32, f32) {
    let alpha = -ph_b - ph_c;
    let beta = ONE_BY_SQRT3 * (ph_b - ph_c);
    (alpha, beta)
}

/// Rotate α/β by the electrical angle θ into the d/q frame.
pub fn park(alpha: f32, beta: f32, theta: f32) -> (f32, f32) {
    let c = theta.cos();
    let s = theta.sin();
    (c * alpha + s * beta, c * beta - s * alpha)
}

/// Rotate d/q back to the stationary frame at angle θ.
pub fn inverse_park(d: f32, q: f32, theta: f32) -> (f32, f32) {
    let c = theta.cos();
    let s = theta.sin();
    (c * d - s * q, c * q + s * d)
}

/// Space-vector modulation: map (α, β) to three normalised on-times.
///
/// Rejects any vector outside the inscribed circle |m| = √3/2, i.e. the whole
/// over-modulation region including the hexagon corners. Inside it, the
/// returned timings are each in [0, 1] with centred zero-vector time; the
/// timings are inverted duties, matching a centre-aligned timer whose compare
/// value counts off-time.
pub fn svm(alpha: f32, beta: f32) -> Option<(f32, f32, f32)> {
    if alpha * alpha + beta * beta > SQRT3_BY_2 * SQRT3_BY_2 {
        return None;
    }

    // Sextant selection by quadrant, then by the 60-degree boundary line.
    let sextant = if beta >= 0. {
        if alpha >= 0. {
            if ONE_BY_SQRT3 * beta > alpha {
                2
            } else {
                1
            }
        } else if -ONE_BY_SQRT3 * beta > alpha {
            3
        } else {
            2
        }
    } else if alpha >= 0. {
        if -ONE_BY_SQRT3 * beta > alpha {
            5
        } else {
            6
        }
    } else if ONE_BY_SQRT3 * beta > alpha {
        4
    } else {
        5
    };

    let (t_a, t_b, t_c);
    match sextant {
        // v1-v2
        1 => {
            let t1 = alpha - ONE_BY_SQRT3 * beta;
            let t2 = TWO_BY_SQRT3 * beta;
            t_a = (1. - t1 - t2) * 0.5;
            t_b = t_a + t1;
            t_c = t_b + t2;
        }
        // v2-v3
        2 => {
            let t2 = alpha + ONE_BY_SQRT3 * beta;
            let t3 = -alpha + ONE_BY_SQRT3 * beta;
            t_b = (1. - t2 - t3) * 0.5;
            t_a = t_b + t3;
            t_c = t_a + t2;
        }
        // v3-v4
        3 => {
            let t3 = TWO_BY_SQRT3 * beta;
            let t4 = -alpha - ONE_BY_SQRT3 * beta;
            t_b = (1. - t3 - t4) * 0.5;
            t_c = t_b + t3;
            t_a = t_c + t4;
        }
        // v4-v5
        4 => {
            let t4 = -alpha + ONE_BY_SQRT3 * beta;
            let t5 = -TWO_BY_SQRT3 * beta;
            t_c = (1. - t4 - t5) * 0.5;
            t_b = t_c + t5;
            t_a = t_b + t4;
        }
        // v5-v6
        5 => {
            let t5 = -alpha - ONE_BY_SQRT3 * beta;
            let t6 = alpha - ONE_BY_SQRT3 * beta;
            t_c = (1. - t5 - t6) * 0.5;
            t_a = t_c + t5;
            t_b = t_a + t6;
        }
        // v6-v1
        _ => {
            let t6 = -TWO_BY_SQRT3 * beta;
            let t1 = alpha + ONE_BY_SQRT3 * beta;
            t_a = (1. - t6 - t1) * 0.5;
            t_c = t_a + t1;
            t_b = t_c + t6;
        }
    }

    Some((t_a, t_b, t_c))
}

/// Recover the modulation vector from a timing triple. Exact inverse of `svm`
/// up to floating error in every sextant; the drive itself never needs this,
/// but plant simulations and tests do.
pub fn svm_inverse(t_a: f32, t_b: f32, t_c: f32) -> (f32, f32) {
    let alpha = 0.5 * (t_b + t_c) - t_a;
    let beta = SQRT3_BY_2 * (t_c - t_b);
    (alpha, beta)
}

//! Property tests for the modulation primitives: the SVM linear range is
//! exactly the inscribed circle, and the frame transforms invert cleanly.

use core::f32::consts::{PI, TAU};

use proptest::prelude::*;
use stator::transforms::{clarke, inverse_park, park, svm, svm_inverse, SQRT3_BY_2};
use stator::util::wrap_pm_pi;

proptest! {
    #[test]
    fn svm_succeeds_on_the_whole_linear_range(
        r in 0.0f32..0.865,
        theta in 0.0f32..TAU,
    ) {
        let alpha = r * theta.cos();
        let beta = r * theta.sin();
        let (t_a, t_b, t_c) = svm(alpha, beta).expect("inside the linear range");
        for t in [t_a, t_b, t_c] {
            prop_assert!((0.0..=1.0).contains(&t), "timing {} out of [0, 1]", t);
        }
        // Duty triple encodes the vector exactly.
        let (ar, br) = svm_inverse(t_a, t_b, t_c);
        prop_assert!((ar - alpha).abs() < 1e-5);
        prop_assert!((br - beta).abs() < 1e-5);
    }

    #[test]
    fn svm_rejects_everything_outside_the_linear_range(
        r in 0.8665f32..3.0,
        theta in 0.0f32..TAU,
    ) {
        let alpha = r * theta.cos();
        let beta = r * theta.sin();
        prop_assert!(svm(alpha, beta).is_none());
    }

    #[test]
    fn park_inverse_park_is_identity(
        alpha in -50.0f32..50.0,
        beta in -50.0f32..50.0,
        theta in -10.0f32..10.0,
    ) {
        let (d, q) = park(alpha, beta, theta);
        let (ar, br) = inverse_park(d, q, theta);
        let scale = alpha.abs().max(beta.abs()).max(1.);
        prop_assert!((ar - alpha).abs() <= 1e-6 * scale);
        prop_assert!((br - beta).abs() <= 1e-6 * scale);
    }

    #[test]
    fn clarke_inverts_under_the_balanced_assumption(
        ph_b in -100.0f32..100.0,
        ph_c in -100.0f32..100.0,
    ) {
        let (alpha, beta) = clarke(ph_b, ph_c);
        // Solve the projection back for the two measured phases.
        let b = -0.5 * alpha + SQRT3_BY_2 * beta;
        let c = -0.5 * alpha - SQRT3_BY_2 * beta;
        let scale = ph_b.abs().max(ph_c.abs()).max(1.);
        prop_assert!((b - ph_b).abs() <= 1e-5 * scale);
        prop_assert!((c - ph_c).abs() <= 1e-5 * scale);
    }

    #[test]
    fn wrapped_angles_stay_in_one_turn(theta in -1_000.0f32..1_000.0) {
        let wrapped = wrap_pm_pi(theta);
        prop_assert!(wrapped >= -PI - 1e-3);
        prop_assert!(wrapped < PI + 1e-3);
        // Wrapping is a whole number of turns away from the input.
        let turns = (theta - wrapped) / TAU;
        prop_assert!((turns - turns.round()).abs() < 1e-2);
    }
}

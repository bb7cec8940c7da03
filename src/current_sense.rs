//! Phase-current acquisition: raw ADC codes to amperes, and negotiation of
//! the sense-amplifier gain against the requested measurement range.

use crate::hw::{CurrentAmplifier, HwConfig};

const ADC_MIDPOINT: i32 = 2_048;
const ADC_FULL_SCALE: f32 = 4_096.;
const ADC_REF_VOLTS: f32 = 3.3;

/// Fraction of the amplifier's linear range the controller is allowed to use.
/// The remainder is headroom before the saturation trip level.
pub const CURRENT_SENSE_MARGIN: f32 = 0.90;

/// Convert a bipolar 12-bit ADC code (centred at 2048) to a phase current.
pub fn phase_current_from_adcval(adcval: u16, rev_gain: f32, shunt_conductance: f32) -> f32 {
    let adcval_bal = adcval as i32 - ADC_MIDPOINT;
    let amp_out_volt = (ADC_REF_VOLTS / ADC_FULL_SCALE) * adcval_bal as f32;
    let shunt_volt = amp_out_volt * rev_gain;
    shunt_volt * shunt_conductance
}

/// Result of gain negotiation: the inverse of the achieved amplifier gain and
/// the current levels derived from it.
#[derive(Clone, Copy, Debug)]
pub struct SenseRange {
    pub rev_gain: f32,
    /// Largest current the controller may regulate to.
    pub max_allowed_current: f32,
    /// Raw per-phase level beyond which the measurement is considered
    /// saturated and the drive trips.
    pub overcurrent_trip_level: f32,
}

/// Pick the amplifier gain for the requested current range. The amplifier
/// snaps to what it can realise; the usable current range is then derived
/// from the achieved gain, not the requested one.
pub fn negotiate_gain(
    amp: &mut impl CurrentAmplifier,
    hw: &HwConfig,
    requested_range: f32,
) -> Option<SenseRange> {
    // Current that produces full output swing at unity gain.
    let max_unity_gain_current = hw.amp_output_swing * hw.shunt_conductance;
    let requested_gain = max_unity_gain_current / requested_range;

    let actual_gain = amp.set_gain(requested_gain)?;
    let rev_gain = 1. / actual_gain;

    let max_allowed_current = CURRENT_SENSE_MARGIN * max_unity_gain_current * rev_gain;
    // Trip at the edge of the amplifier's linear range.
    let overcurrent_trip_level = max_allowed_current / CURRENT_SENSE_MARGIN;

    Some(SenseRange {
        rev_gain,
        max_allowed_current,
        overcurrent_trip_level,
    })
}

//! User-writable motor configuration, and the fault bitmask the rest of the
//! crate reports into.

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

/// Calibrated phase inductance must land in this range, or the identification
/// is considered to have failed. Values outside it indicate an open winding,
/// a shorted winding, or a wiring fault.
pub const MIN_PHASE_INDUCTANCE: f32 = 2e-6; // H
pub const MAX_PHASE_INDUCTANCE: f32 = 4_000e-6; // H

/// The drive strategy for the connected machine. Repr u8 is for passing over
/// configuration interfaces that transport it as a raw byte.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorType {
    /// Low-resistance PM motor, driven in current mode.
    HighCurrent = 0,
    /// High-resistance, high-inductance motor driven in voltage mode; the
    /// winding resistance keeps current bounded without a current loop.
    Gimbal = 1,
    /// AC induction machine. Requires slip tracking and rotor flux estimation.
    Acim = 2,
}

impl Default for MotorType {
    fn default() -> Self {
        Self::HighCurrent
    }
}

bitflags! {
    /// Fault kinds. Sticky: bits accumulate until explicitly cleared by the
    /// supervisor, and any set bit keeps the bridge disarmed.
    #[derive(Default)]
    pub struct MotorError: u32 {
        const PHASE_RESISTANCE_OUT_OF_RANGE  = 1 << 0;
        const PHASE_INDUCTANCE_OUT_OF_RANGE  = 1 << 1;
        const DRV_FAULT                      = 1 << 2;
        const MOTOR_THERMISTOR_OVER_TEMP     = 1 << 3;
        const FET_THERMISTOR_OVER_TEMP       = 1 << 4;
        const CURRENT_MEASUREMENT_TIMEOUT    = 1 << 5;
        const CONTROL_DEADLINE_MISSED        = 1 << 6;
        const CURRENT_SENSE_SATURATION       = 1 << 7;
        const CURRENT_LIMIT_VIOLATION        = 1 << 8;
        const MODULATION_MAGNITUDE           = 1 << 9;
        const MODULATION_IS_NAN              = 1 << 10;
        const NOT_IMPLEMENTED_MOTOR_TYPE     = 1 << 11;
    }
}

/// Motor configuration. Plain data; mutate through `Motor::set_config` so the
/// values are validated and the controller gains stay in sync with R/L.
#[derive(Clone, Copy, Debug)]
pub struct MotorConfig {
    pub motor_type: MotorType,
    /// Phase resistance, ohms. Identified by calibration unless `pre_calibrated`.
    pub phase_resistance: f32,
    /// Phase inductance, henries. Identified by calibration unless `pre_calibrated`.
    pub phase_inductance: f32,
    /// Nm per ampere of quadrature current.
    pub torque_constant: f32,
    pub pole_pairs: u32,
    /// Configured current cap, A. The effective limit may be lower; see
    /// `Motor::update_effective_current_lim`.
    pub current_lim: f32,
    /// Tolerated transient overshoot beyond the effective limit, A.
    pub current_lim_margin: f32,
    /// Torque cap, Nm.
    pub torque_lim: f32,
    /// Largest phase current the sense amplifier should be able to represent, A.
    /// Informs gain negotiation during `setup`.
    pub requested_current_range: f32,
    /// Test current for resistance identification, A.
    pub calibration_current: f32,
    /// Voltage ceiling for the resistance identification regulator, V.
    pub resistance_calib_max_voltage: f32,
    /// Current-loop bandwidth, rad/s. Sets the PI gains together with R and L.
    pub current_control_bandwidth: f32,
    /// +1. or -1.; flips commanded torque and reported phase.
    pub direction: f32,
    /// Decouple the cross-axis R/ωL terms and feed the resistive drop forward.
    pub r_wl_ff_enable: bool,
    /// Feed the speed-proportional back-EMF forward on the q axis.
    pub bemf_ff_enable: bool,
    /// Slip velocity of the induction machine at rated flux, rad/s.
    pub acim_slip_velocity: f32,
    /// Floor applied to the rotor flux estimate in the torque→current mapping.
    pub acim_gain_min_flux: f32,
    pub acim_autoflux_enable: bool,
    pub acim_autoflux_min_id: f32,
    pub acim_autoflux_attack_gain: f32,
    pub acim_autoflux_decay_gain: f32,
    /// Trust the stored R/L instead of requiring a calibration run.
    pub pre_calibrated: bool,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            motor_type: MotorType::HighCurrent,
            phase_resistance: 0.,
            phase_inductance: 0.,
            torque_constant: 0.04,
            pole_pairs: 7,
            current_lim: 10.,
            current_lim_margin: 8.,
            torque_lim: f32::INFINITY,
            requested_current_range: 60.,
            calibration_current: 10.,
            resistance_calib_max_voltage: 2.,
            current_control_bandwidth: 1_000.,
            direction: 1.,
            r_wl_ff_enable: false,
            bemf_ff_enable: false,
            acim_slip_velocity: 14.706,
            acim_gain_min_flux: 10.,
            acim_autoflux_enable: false,
            acim_autoflux_min_id: 10.,
            acim_autoflux_attack_gain: 10.,
            acim_autoflux_decay_gain: 1.,
            pre_calibrated: false,
        }
    }
}

impl MotorConfig {
    /// Sanity-check a configuration before accepting it. Rejects values that
    /// would make the control loop divide by zero or command the wrong sign.
    pub fn validate(&self) -> bool {
        self.pole_pairs >= 1
            && self.torque_constant > 0.
            && self.current_lim >= 0.
            && self.current_lim_margin >= 0.
            && self.torque_lim >= 0.
            && self.requested_current_range > 0.
            && self.calibration_current > 0.
            && self.resistance_calib_max_voltage > 0.
            && self.current_control_bandwidth > 0.
            && (self.direction == 1. || self.direction == -1.)
            && self.phase_resistance >= 0.
            && self.phase_inductance >= 0.
            && self.acim_gain_min_flux > 0.
            && self.acim_slip_velocity > 0.
    }
}

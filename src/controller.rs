//! The inner current loop: PI control in the d/q frame with feed-forward and
//! saturation-aware anti-windup, plus the voltage-mode path used by gimbal
//! motors and calibration.

use num_traits::Float;

use crate::{
    hw::{Axis, CurrentAmplifier, GateDriver, PwmTimer},
    motor::{Motor, TimingLogSlot},
    state::MotorError,
    transforms::{clarke, inverse_park, park, svm, SQRT3_BY_2},
};

/// Fraction of the linear modulation range the controller commands into.
/// Beyond it the output vector is scaled back and the integrators decay.
const MOD_SATURATION: f32 = 0.80;

/// Per-tick integrator decay factor while the modulation vector saturates.
const SATURATION_INTEGRAL_DECAY: f32 = 0.99;

/// Current-loop state and telemetry. Mutated only from the control ISR, or
/// while disarmed.
#[derive(Clone, Copy, Debug, Default)]
pub struct CurrentControl {
    /// Proportional gain, V/A. `bandwidth * L`.
    pub p_gain: f32,
    /// Integral gain, V/(A·s). `(R / L) * p_gain`.
    pub i_gain: f32,
    pub v_integral_d: f32,
    pub v_integral_q: f32,
    /// Setpoints as last dispatched, for telemetry.
    pub id_setpoint: f32,
    pub iq_setpoint: f32,
    /// Report-filtered measured currents; the raw values feed the PI loop.
    pub id_measured: f32,
    pub iq_measured: f32,
    /// First-order IIR coefficient for the measured-current reports.
    pub i_measured_report_filter_k: f32,
    /// DC bus current estimate.
    pub ibus: f32,
    /// Hard ceiling from the sense range; set during `setup`.
    pub max_allowed_current: f32,
    /// Raw per-phase saturation trip level; set during `setup`.
    pub overcurrent_trip_level: f32,
    /// Rotor flux estimate for induction machines, normalised to amperes of
    /// magnetising current.
    pub acim_rotor_flux: f32,
    /// Slip velocity last applied, rad/s.
    pub async_phase_vel: f32,
    /// Integrated slip angle, wrapped to one turn.
    pub async_phase_offset: f32,
    /// Stationary-frame voltage actually commanded, for sensorless estimators.
    pub final_v_alpha: f32,
    pub final_v_beta: f32,
}

impl CurrentControl {
    pub fn new() -> Self {
        Self {
            i_measured_report_filter_k: 1.,
            ..Default::default()
        }
    }
}

impl<P, G, A, X> Motor<P, G, A, X>
where
    P: PwmTimer,
    G: GateDriver,
    A: CurrentAmplifier,
    X: Axis,
{
    /// Re-derive the PI gains from the identified plant and the configured
    /// loop bandwidth. Call after any change to R or L.
    pub fn update_current_controller_gains(&mut self) {
        // Series R-L plant: the bandwidth sets P directly, and matching the
        // plant pole (tau = L/R) gives I = P / tau = bandwidth * R.
        self.current_control.p_gain =
            self.config.current_control_bandwidth * self.config.phase_inductance;
        self.current_control.i_gain =
            self.config.current_control_bandwidth * self.config.phase_resistance;
    }

    /// Zero the controller state that must not leak across an arm cycle.
    /// Gains, trip levels and the report filter coefficient survive.
    pub(crate) fn reset_current_control(&mut self) {
        let cc = &mut self.current_control;
        cc.v_integral_d = 0.;
        cc.v_integral_q = 0.;
        cc.id_setpoint = 0.;
        cc.iq_setpoint = 0.;
        cc.ibus = 0.;
        cc.acim_rotor_flux = 0.;
        cc.async_phase_vel = 0.;
        cc.async_phase_offset = 0.;
        cc.final_v_alpha = 0.;
        cc.final_v_beta = 0.;
    }

    /// One tick of the d/q current loop.
    ///
    /// `i_phase` un-rotates the measured currents; `pwm_phase` re-rotates the
    /// commanded voltage for the upcoming PWM cycle; `phase_vel` feeds the
    /// decoupling and back-EMF feed-forward terms.
    pub fn foc_current(
        &mut self,
        id_setpoint: f32,
        iq_setpoint: f32,
        i_phase: f32,
        pwm_phase: f32,
        phase_vel: f32,
    ) -> bool {
        self.current_control.iq_setpoint = iq_setpoint;

        // A phase measurement outside the amplifier's linear range means the
        // numbers below it are garbage; trip before using them.
        let trip = self.current_control.overcurrent_trip_level;
        if self.current_meas.ph_b.abs() > trip || self.current_meas.ph_c.abs() > trip {
            self.set_error(MotorError::CURRENT_SENSE_SATURATION);
            return false;
        }

        let (i_alpha, i_beta) = clarke(self.current_meas.ph_b, self.current_meas.ph_c);
        let (id, iq) = park(i_alpha, i_beta, i_phase);

        let k = self.current_control.i_measured_report_filter_k;
        self.current_control.id_measured += k * (id - self.current_control.id_measured);
        self.current_control.iq_measured += k * (iq - self.current_control.iq_measured);

        let i_trip = self.effective_current_lim + self.config.current_lim_margin;
        if id * id + iq * iq > i_trip * i_trip {
            self.set_error(MotorError::CURRENT_LIMIT_VIOLATION);
            return false;
        }

        let err_d = id_setpoint - id;
        let err_q = iq_setpoint - iq;

        let mut vd = self.current_control.v_integral_d + err_d * self.current_control.p_gain;
        let mut vq = self.current_control.v_integral_q + err_q * self.current_control.p_gain;

        if self.config.r_wl_ff_enable {
            // Cross-axis inductive decoupling, then the resistive drop.
            vd -= phase_vel * self.config.phase_inductance * iq_setpoint;
            vq += phase_vel * self.config.phase_inductance * id_setpoint;
            vd += self.config.phase_resistance * id_setpoint;
            vq += self.config.phase_resistance * iq_setpoint;
        }
        if self.config.bemf_ff_enable {
            vq += phase_vel * (2. / 3.)
                * (self.config.torque_constant / self.config.pole_pairs as f32);
        }

        let mod_to_v = (2. / 3.) * self.vbus_voltage;
        let v_to_mod = 1. / mod_to_v;
        let mut mod_d = v_to_mod * vd;
        let mut mod_q = v_to_mod * vq;

        // Vector modulation saturation: scale back into the linear range and
        // bleed the integrators instead of accumulating further.
        let mod_scalefactor =
            MOD_SATURATION * SQRT3_BY_2 / (mod_d * mod_d + mod_q * mod_q).sqrt();
        if mod_scalefactor < 1. {
            mod_d *= mod_scalefactor;
            mod_q *= mod_scalefactor;
            self.current_control.v_integral_d *= SATURATION_INTEGRAL_DECAY;
            self.current_control.v_integral_q *= SATURATION_INTEGRAL_DECAY;
        } else {
            let ki_dt = self.current_control.i_gain * self.hw.current_meas_period();
            self.current_control.v_integral_d += err_d * ki_dt;
            self.current_control.v_integral_q += err_q * ki_dt;
        }

        self.current_control.ibus = mod_d * id + mod_q * iq;

        let (mod_alpha, mod_beta) = inverse_park(mod_d, mod_q, pwm_phase);
        self.current_control.final_v_alpha = mod_to_v * mod_alpha;
        self.current_control.final_v_beta = mod_to_v * mod_beta;

        if !self.enqueue_modulation_timings(mod_alpha, mod_beta) {
            return false;
        }
        self.log_timing(TimingLogSlot::FocCurrent);
        true
    }

    /// Voltage-mode tick: rotate the d/q voltage command to the stationary
    /// frame and enqueue it. Used for gimbal motors, where winding resistance
    /// bounds the current.
    pub fn foc_voltage(&mut self, v_d: f32, v_q: f32, pwm_phase: f32) -> bool {
        let (v_alpha, v_beta) = inverse_park(v_d, v_q, pwm_phase);
        self.current_control.final_v_alpha = v_alpha;
        self.current_control.final_v_beta = v_beta;
        if !self.enqueue_voltage_timings(v_alpha, v_beta) {
            return false;
        }
        self.log_timing(TimingLogSlot::FocVoltage);
        true
    }

    /// Convert a stationary-frame voltage to modulation against the present
    /// bus voltage and enqueue it.
    pub fn enqueue_voltage_timings(&mut self, v_alpha: f32, v_beta: f32) -> bool {
        let v_to_mod = 1. / ((2. / 3.) * self.vbus_voltage);
        self.enqueue_modulation_timings(v_to_mod * v_alpha, v_to_mod * v_beta)
    }

    /// Run the modulation vector through SVM and publish the duty counts for
    /// the next PWM reload. Rejects NaN and over-modulation; both fault and
    /// disarm, since a stale timing triple would otherwise be latched.
    pub fn enqueue_modulation_timings(&mut self, mod_alpha: f32, mod_beta: f32) -> bool {
        if mod_alpha.is_nan() || mod_beta.is_nan() {
            self.set_error(MotorError::MODULATION_IS_NAN);
            return false;
        }
        let Some((t_a, t_b, t_c)) = svm(mod_alpha, mod_beta) else {
            self.set_error(MotorError::MODULATION_MAGNITUDE);
            return false;
        };
        let period = self.hw.period_clocks as f32;
        self.timings.publish([
            (t_a * period).round() as u16,
            (t_b * period).round() as u16,
            (t_c * period).round() as u16,
        ]);
        true
    }
}

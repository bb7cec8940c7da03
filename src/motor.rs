//! The motor instance: owns the bridge-facing hardware handles, the
//! configuration and the controller state, and runs the per-tick torque →
//! current → modulation chain.

use num_traits::Float;

use crate::{
    controller::CurrentControl,
    current_sense::{self, negotiate_gain},
    hw::{Axis, CurrentAmplifier, GateDriver, HwConfig, PhaseCurrents, PwmTimer, Thermistor},
    safety::{ArmState, TimingsHandoff},
    state::{MotorConfig, MotorError, MotorType, MAX_PHASE_INDUCTANCE, MIN_PHASE_INDUCTANCE},
    transforms::ONE_BY_SQRT3,
    util::wrap_pm_pi,
};

/// A gimbal motor's "current" limit is a voltage limit; leave a little slack
/// below the theoretical bus ceiling.
const GIMBAL_VOLTAGE_MARGIN: f32 = 0.98;

/// How far into the upcoming PWM period the commanded voltage vector is
/// predicted to act, in periods. Centre-aligned PWM puts the average applied
/// voltage one and a half periods past the measurement.
const PWM_PHASE_LEAD_PERIODS: f32 = 1.5;

/// Stages of one control tick whose latency is traced.
#[derive(Clone, Copy)]
#[repr(usize)]
pub enum TimingLogSlot {
    UpdateStart = 0,
    AdcCb,
    FocVoltage,
    FocCurrent,
}

const TIMING_LOG_SLOTS: usize = 4;

/// Cycle-count trace of the most recent pass through each stage. All zeros
/// unless the axis provides a timing counter.
#[derive(Clone, Copy, Default, Debug)]
pub struct TimingLog([u16; TIMING_LOG_SLOTS]);

impl TimingLog {
    pub fn get(&self, slot: TimingLogSlot) -> u16 {
        self.0[slot as usize]
    }
}

pub struct Motor<P, G, A, X>
where
    P: PwmTimer,
    G: GateDriver,
    A: CurrentAmplifier,
    X: Axis,
{
    pub(crate) pwm: P,
    pub(crate) gate_driver: G,
    pub(crate) opamp: A,
    pub(crate) axis: X,
    /// Duty-count handoff to the PWM reload ISR. Lives outside the struct
    /// (typically in a `static`) so the ISR side can be wired independently.
    pub(crate) timings: &'static TimingsHandoff,
    pub hw: HwConfig,
    pub config: MotorConfig,
    pub current_control: CurrentControl,
    /// DC bus voltage, V. Refreshed by the bus-sense layer.
    pub vbus_voltage: f32,
    /// Latest phase currents, refreshed by the ADC layer before each control
    /// ISR invocation (and by the calibration pump).
    pub current_meas: PhaseCurrents,
    pub(crate) arm_state: ArmState,
    pub(crate) error: MotorError,
    pub(crate) is_calibrated: bool,
    pub(crate) phase_current_rev_gain: f32,
    pub(crate) effective_current_lim: f32,
    pub(crate) timing_log: TimingLog,
}

impl<P, G, A, X> Motor<P, G, A, X>
where
    P: PwmTimer,
    G: GateDriver,
    A: CurrentAmplifier,
    X: Axis,
{
    pub fn new(
        pwm: P,
        gate_driver: G,
        opamp: A,
        axis: X,
        timings: &'static TimingsHandoff,
        hw: HwConfig,
        config: MotorConfig,
    ) -> Self {
        let effective_current_lim = config.current_lim;
        Self {
            pwm,
            gate_driver,
            opamp,
            axis,
            timings,
            hw,
            config,
            current_control: CurrentControl::new(),
            vbus_voltage: 0.,
            current_meas: PhaseCurrents::default(),
            arm_state: ArmState::Disarmed,
            error: MotorError::empty(),
            is_calibrated: false,
            phase_current_rev_gain: 0.,
            effective_current_lim,
            timing_log: TimingLog::default(),
        }
    }

    /// One-time bring-up: initialise the gate driver and negotiate the
    /// current-sense gain for the requested measurement range. Populates
    /// `max_allowed_current` and the saturation trip level. With
    /// `pre_calibrated` and plausible stored R/L, also restores the
    /// controller gains so no calibration run is needed.
    pub fn setup(&mut self) -> bool {
        if !self.gate_driver.init() {
            self.set_error(MotorError::DRV_FAULT);
            return false;
        }

        let Some(range) =
            negotiate_gain(&mut self.opamp, &self.hw, self.config.requested_current_range)
        else {
            self.set_error(MotorError::DRV_FAULT);
            return false;
        };
        self.phase_current_rev_gain = range.rev_gain;
        self.current_control.max_allowed_current = range.max_allowed_current;
        self.current_control.overcurrent_trip_level = range.overcurrent_trip_level;
        debug!(
            "current sense range: max {} A, trip {} A",
            range.max_allowed_current, range.overcurrent_trip_level
        );

        if self.config.pre_calibrated
            && self.config.phase_resistance > 0.
            && (MIN_PHASE_INDUCTANCE..=MAX_PHASE_INDUCTANCE)
                .contains(&self.config.phase_inductance)
        {
            self.update_current_controller_gains();
            self.is_calibrated = true;
        }
        true
    }

    /// Validated configuration write. Rejected values leave everything
    /// untouched; accepted ones re-derive the controller gains in case R or L
    /// changed. Only callable while disarmed.
    pub fn set_config(&mut self, config: MotorConfig) -> bool {
        if self.arm_state != ArmState::Disarmed || !config.validate() {
            return false;
        }
        self.config = config;
        if self.config.phase_resistance > 0. && self.config.phase_inductance > 0. {
            self.update_current_controller_gains();
        }
        true
    }

    /// Accept a motor type from its raw configuration-interface byte.
    pub fn set_motor_type_from_repr(&mut self, raw: u8) -> bool {
        match MotorType::try_from(raw) {
            Ok(motor_type) => {
                self.config.motor_type = motor_type;
                true
            }
            Err(_) => {
                self.set_error(MotorError::NOT_IMPLEMENTED_MOTOR_TYPE);
                false
            }
        }
    }

    /// Convert a raw ADC code into a phase current using the negotiated
    /// amplifier gain.
    pub fn phase_current_from_adcval(&self, adcval: u16) -> f32 {
        current_sense::phase_current_from_adcval(
            adcval,
            self.phase_current_rev_gain,
            self.hw.shunt_conductance,
        )
    }

    pub fn error(&self) -> MotorError {
        self.error
    }

    /// Clear latched faults. The bridge stays disarmed; re-arm explicitly.
    pub fn clear_errors(&mut self) {
        self.error = MotorError::empty();
    }

    pub fn is_armed(&self) -> bool {
        self.arm_state == ArmState::Armed
    }

    pub fn is_calibrated(&self) -> bool {
        self.is_calibrated
    }

    pub(crate) fn set_calibrated(&mut self) {
        self.is_calibrated = true;
    }

    pub fn timing_log(&self) -> &TimingLog {
        &self.timing_log
    }

    /// Stamp the latency trace for one stage. The FOC paths call this
    /// themselves; the ADC callback glue stamps `AdcCb`.
    pub fn log_timing(&mut self, slot: TimingLogSlot) {
        self.timing_log.0[slot as usize] = self.axis.timing_sample();
    }

    /// Recompute the effective current limit from the configured cap, the
    /// sense-range cap (or the bus-voltage cap for voltage-mode motors) and
    /// the two thermal throttles. Run once per control tick from the
    /// supervisor.
    pub fn update_effective_current_lim(
        &mut self,
        motor_therm: &impl Thermistor,
        fet_therm: &impl Thermistor,
    ) -> f32 {
        let mut lim = self.config.current_lim;
        lim = match self.config.motor_type {
            // Voltage-mode: the "current" limit caps the commanded voltage.
            MotorType::Gimbal => lim.min(GIMBAL_VOLTAGE_MARGIN * ONE_BY_SQRT3 * self.vbus_voltage),
            _ => lim.min(self.current_control.max_allowed_current),
        };
        lim = lim.min(motor_therm.get_current_limit(self.config.current_lim));
        lim = lim.min(fet_therm.get_current_limit(self.config.current_lim));
        self.effective_current_lim = lim;
        lim
    }

    pub fn effective_current_lim(&self) -> f32 {
        self.effective_current_lim
    }

    /// Torque the drive can still deliver under the present limits. For
    /// induction machines the deliverable torque also scales with the rotor
    /// flux actually established.
    pub fn max_available_torque(&self) -> f32 {
        let torque = match self.config.motor_type {
            MotorType::Acim => {
                self.effective_current_lim
                    * self.config.torque_constant
                    * self.current_control.acim_rotor_flux
            }
            _ => self.effective_current_lim * self.config.torque_constant,
        };
        torque.clamp(0., self.config.torque_lim)
    }

    /// Background health checks: gate-driver fault line and both thermistors.
    pub fn do_checks(
        &mut self,
        motor_therm: &mut impl Thermistor,
        fet_therm: &mut impl Thermistor,
    ) -> bool {
        if !self.gate_driver.check_fault() {
            self.set_error(MotorError::DRV_FAULT);
            return false;
        }
        if !motor_therm.do_checks() {
            self.set_error(MotorError::MOTOR_THERMISTOR_OVER_TEMP);
            return false;
        }
        if !fet_therm.do_checks() {
            self.set_error(MotorError::FET_THERMISTOR_OVER_TEMP);
            return false;
        }
        true
    }

    /// One control tick: map the commanded torque to current setpoints, track
    /// slip and rotor flux for induction machines, predict the PWM-centre
    /// phase, and dispatch to the current- or voltage-mode inner loop.
    ///
    /// `phase` and `phase_vel` are electrical, in the mechanical sign
    /// convention; `direction` is applied here.
    pub fn update(&mut self, torque_setpoint: f32, phase: f32, phase_vel: f32) -> bool {
        self.log_timing(TimingLogSlot::UpdateStart);

        let mut phase = phase * self.config.direction;
        let mut phase_vel = phase_vel * self.config.direction;

        let mut current_setpoint = match self.config.motor_type {
            MotorType::Acim => {
                // Torque per ampere scales with the flux actually in the
                // rotor; the floor keeps the mapping sane at zero flux.
                torque_setpoint
                    / (self.config.torque_constant
                        * self
                            .current_control
                            .acim_rotor_flux
                            .max(self.config.acim_gain_min_flux))
            }
            _ => torque_setpoint / self.config.torque_constant,
        };
        current_setpoint *= self.config.direction;

        let ilim = self.effective_current_lim;
        let mut id = self.current_control.id_setpoint.clamp(-ilim, ilim);
        let iq = current_setpoint.clamp(-ilim, ilim);

        if self.config.motor_type == MotorType::Acim {
            let period = self.hw.current_meas_period();

            if self.config.acim_autoflux_enable {
                let abs_iq = iq.abs();
                let gain = if abs_iq > id {
                    self.config.acim_autoflux_attack_gain
                } else {
                    self.config.acim_autoflux_decay_gain
                };
                id += gain * (abs_iq - id) * period;
                // The flux floor loses to a thermally throttled limit.
                let min_id = self.config.acim_autoflux_min_id.min(ilim);
                id = id.clamp(min_id, ilim);
                self.current_control.id_setpoint = id;
            }

            // First-order rotor flux model, normalised to amperes tracking Id.
            let dflux_by_dt =
                self.config.acim_slip_velocity * (id - self.current_control.acim_rotor_flux);
            self.current_control.acim_rotor_flux += dflux_by_dt * period;

            let mut slip_velocity =
                self.config.acim_slip_velocity * (iq / self.current_control.acim_rotor_flux);
            // Inverted polarity so NaN from a vanishing flux estimate also
            // takes the substitute-zero branch.
            if !(slip_velocity.abs() <= 0.1 * self.hw.current_meas_hz) {
                slip_velocity = 0.;
            }
            self.current_control.async_phase_vel = slip_velocity;
            phase_vel += slip_velocity;

            self.current_control.async_phase_offset =
                wrap_pm_pi(self.current_control.async_phase_offset + slip_velocity * period);
            phase = wrap_pm_pi(phase + self.current_control.async_phase_offset);
        }

        let pwm_phase =
            phase + PWM_PHASE_LEAD_PERIODS * self.hw.current_meas_period() * phase_vel;

        match self.config.motor_type {
            MotorType::HighCurrent | MotorType::Acim => {
                self.foc_current(id, iq, phase, pwm_phase, phase_vel)
            }
            MotorType::Gimbal => self.foc_voltage(id, iq, pwm_phase),
        }
    }
}

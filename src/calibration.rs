//! Open-loop identification of the electrical plant: phase resistance by an
//! integrating current regulator, phase inductance by a square-wave voltage
//! excitation. Both drive phase A only, which also conveniently locks the
//! rotor against a pole.

use num_traits::Float;

use crate::{
    hw::{Axis, CurrentAmplifier, GateDriver, PhaseCurrents, PwmTimer},
    motor::Motor,
    state::{MotorError, MotorType, MAX_PHASE_INDUCTANCE, MIN_PHASE_INDUCTANCE},
};

/// Integrator gain of the resistance-test current regulator, (V/s)/A.
const CALIB_KI: f32 = 10.;

/// The resistance test runs this long; the regulator settles in well under a
/// tenth of it.
const RESISTANCE_TEST_SECONDS: f32 = 3.;

/// High/low pairs driven during the inductance test.
const INDUCTANCE_NUM_CYCLES: usize = 5_000;

impl<P, G, A, X> Motor<P, G, A, X>
where
    P: PwmTimer,
    G: GateDriver,
    A: CurrentAmplifier,
    X: Axis,
{
    /// Tick pump for routines that run in lockstep with the control ISR: wait
    /// for the next measurement, then run `body` once. Stops when `body`
    /// returns false; aborts when the wait times out or a fault appears
    /// between ticks. True iff the loop finished with no fault latched.
    pub fn run_control_loop(
        &mut self,
        mut body: impl FnMut(&mut Self, PhaseCurrents) -> bool,
    ) -> bool {
        loop {
            let Some(meas) = self.axis.wait_for_current_meas() else {
                self.set_error(MotorError::CURRENT_MEASUREMENT_TIMEOUT);
                return false;
            };
            self.current_meas = meas;
            if !body(self, meas) {
                break;
            }
            if !self.error().is_empty() {
                return false;
            }
        }
        self.error().is_empty()
    }

    /// Identify the phase resistance by regulating `test_current` through
    /// phase A with a pure integrator and reading off the settled voltage.
    /// Fails if the regulator needs more than `max_voltage` to get there
    /// (open winding, bad wiring, or a too-ambitious test current).
    pub fn measure_phase_resistance(&mut self, test_current: f32, max_voltage: f32) -> bool {
        let num_test_cycles = (RESISTANCE_TEST_SECONDS * self.hw.current_meas_hz) as usize;
        let ki_dt = CALIB_KI * self.hw.current_meas_period();

        let mut test_voltage = 0.;
        let mut cycles = 0;
        let ok = self.run_control_loop(|motor, meas| {
            let i_alpha = -(meas.ph_b + meas.ph_c);
            test_voltage += ki_dt * (test_current - i_alpha);
            if test_voltage.abs() > max_voltage {
                motor.set_error(MotorError::PHASE_RESISTANCE_OUT_OF_RANGE);
                return false;
            }

            // Test voltage along phase A.
            if !motor.enqueue_voltage_timings(test_voltage, 0.) {
                return false;
            }

            cycles += 1;
            cycles < num_test_cycles
        });
        if !ok {
            return false;
        }

        // De-energise; don't leave the winding holding the test current.
        let _ = self.enqueue_voltage_timings(0., 0.);

        self.config.phase_resistance = test_voltage / test_current;
        info!("identified phase resistance: {} ohm", self.config.phase_resistance);
        true
    }

    /// Identify the phase inductance by alternating `voltage_low` and
    /// `voltage_high` on phase A each tick and comparing the accumulated
    /// currents of the two half-populations.
    pub fn measure_phase_inductance(&mut self, voltage_low: f32, voltage_high: f32) -> bool {
        let test_voltages = [voltage_low, voltage_high];
        let mut i_alphas = [0.; 2];

        let mut t = 0;
        let ok = self.run_control_loop(|motor, meas| {
            let i = t & 1;
            i_alphas[i] += -meas.ph_b - meas.ph_c;

            // Test voltage along phase A.
            if !motor.enqueue_voltage_timings(test_voltages[i], 0.) {
                return false;
            }

            t += 1;
            t < INDUCTANCE_NUM_CYCLES * 2
        });
        if !ok {
            return false;
        }

        let _ = self.enqueue_voltage_timings(0., 0.);

        let v_l = 0.5 * (voltage_high - voltage_low);
        // Each accumulator holds one sample per cycle, so the pair difference
        // over the run normalises by the cycle count once.
        let di_by_dt = (i_alphas[1] - i_alphas[0])
            / (self.hw.current_meas_period() * INDUCTANCE_NUM_CYCLES as f32);
        let inductance = v_l / di_by_dt;

        self.config.phase_inductance = inductance;
        info!("identified phase inductance: {} H", inductance);

        if !(MIN_PHASE_INDUCTANCE..=MAX_PHASE_INDUCTANCE).contains(&inductance) {
            self.set_error(MotorError::PHASE_INDUCTANCE_OUT_OF_RANGE);
            return false;
        }
        true
    }

    /// Identify whatever the configured motor type needs. Current-mode types
    /// get resistance then inductance; gimbal motors are driven in voltage
    /// mode and need neither. On success the controller gains are refreshed
    /// from the identified plant.
    pub fn run_calibration(&mut self) -> bool {
        let max_voltage = self.config.resistance_calib_max_voltage;
        match self.config.motor_type {
            MotorType::HighCurrent | MotorType::Acim => {
                if !self.arm() {
                    return false;
                }
                let ok = self
                    .measure_phase_resistance(self.config.calibration_current, max_voltage)
                    && self.measure_phase_inductance(-max_voltage, max_voltage);
                self.disarm();
                if !ok {
                    return false;
                }
            }
            MotorType::Gimbal => {
                // No electrical identification needed; runs open-loop voltage.
            }
        }

        self.update_current_controller_gains();
        self.set_calibrated();
        true
    }
}

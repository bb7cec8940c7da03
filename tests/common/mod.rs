//! Mock hardware and a small electrical plant model for driving the control
//! core on the host.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use stator::transforms::svm_inverse;
use stator::{
    Axis, CurrentAmplifier, GateDriver, HwConfig, Motor, MotorConfig, PhaseCurrents, PwmTimer,
    Thermistor, TimingsHandoff,
};

/// Fresh handoff with the 'static lifetime the motor expects; on hardware
/// this is a `static`, here we leak one per test.
pub fn leak_handoff() -> &'static TimingsHandoff {
    Box::leak(Box::new(TimingsHandoff::new()))
}

#[derive(Clone, Default)]
pub struct PwmProbe {
    pub armed: Rc<RefCell<bool>>,
    pub applied: Rc<RefCell<Vec<[u16; 3]>>>,
}

pub struct MockPwm(pub PwmProbe);

impl PwmTimer for MockPwm {
    fn apply_timings(&mut self, timings: [u16; 3]) {
        self.0.applied.borrow_mut().push(timings);
    }
    fn arm(&mut self) {
        *self.0.armed.borrow_mut() = true;
    }
    fn disarm(&mut self) {
        *self.0.armed.borrow_mut() = false;
    }
}

pub struct MockGateDriver {
    pub init_ok: bool,
    pub healthy: bool,
}

impl Default for MockGateDriver {
    fn default() -> Self {
        Self {
            init_ok: true,
            healthy: true,
        }
    }
}

impl GateDriver for MockGateDriver {
    fn init(&mut self) -> bool {
        self.init_ok
    }
    fn check_fault(&mut self) -> bool {
        self.healthy
    }
}

/// Sense amplifier with the usual power-of-two gain ladder; snaps the
/// requested gain downward so the realised range covers the requested one.
pub struct SnapAmp;

impl CurrentAmplifier for SnapAmp {
    fn set_gain(&mut self, requested: f32) -> Option<f32> {
        let mut actual = 10.;
        for gain in [10., 20., 40., 80.] {
            if gain <= requested {
                actual = gain;
            }
        }
        Some(actual)
    }
}

/// Thermistor stub returning a fixed cap.
pub struct MockTherm {
    pub cap: f32,
    pub ok: bool,
}

impl MockTherm {
    pub fn unlimited() -> Self {
        Self {
            cap: f32::INFINITY,
            ok: true,
        }
    }
    pub fn capped(cap: f32) -> Self {
        Self { cap, ok: true }
    }
}

impl Thermistor for MockTherm {
    fn do_checks(&mut self) -> bool {
        self.ok
    }
    fn get_current_limit(&self, max: f32) -> f32 {
        max.min(self.cap)
    }
}

/// Axis stub: measurements always ready, with the latest value settable from
/// the test body through the shared cell.
#[derive(Default)]
pub struct StubAxis {
    pub meas: Rc<RefCell<PhaseCurrents>>,
    pub failures: Rc<RefCell<u32>>,
}

impl Axis for StubAxis {
    fn wait_for_current_meas(&mut self) -> Option<PhaseCurrents> {
        Some(*self.meas.borrow())
    }
    fn sample_encoder_now(&mut self) {}
    fn controller_reset(&mut self) {}
    fn motor_failed(&mut self) {
        *self.failures.borrow_mut() += 1;
    }
    fn update_brake_current(&mut self) {}
}

/// Axis whose waits never complete, for exercising the measurement timeout.
pub struct DeadAxis;

impl Axis for DeadAxis {
    fn wait_for_current_meas(&mut self) -> Option<PhaseCurrents> {
        None
    }
    fn sample_encoder_now(&mut self) {}
    fn controller_reset(&mut self) {}
    fn motor_failed(&mut self) {}
    fn update_brake_current(&mut self) {}
}

/// Electrical model of the phase-A loop the calibration routines drive.
pub enum PlantModel {
    /// Instantaneous `I = V / R`.
    Resistive { r: f32 },
    /// Pure integrator `dI/dt = V / L`.
    Inductive { l: f32 },
    /// Series R-L winding, `dI/dt = (V - R*I) / L`.
    SeriesRl { r: f32, l: f32 },
}

/// Axis that plays the roles of the ADC layer, the PWM reload ISR and the
/// plant at once. Each wait is one PWM period boundary: advance the plant
/// under the voltage latched at the previous boundary, latch whatever the
/// control context queued since, and hand back the resulting currents. This
/// reproduces the enqueue → reload-latch → sample pipeline of the hardware.
pub struct SimAxis {
    pub handoff: &'static TimingsHandoff,
    pub plant: PlantModel,
    pub hw: HwConfig,
    pub vbus: f32,
    pub v_latched: f32,
    pub i_alpha: f32,
    pub ticks: u64,
}

impl SimAxis {
    pub fn new(handoff: &'static TimingsHandoff, plant: PlantModel, hw: HwConfig, vbus: f32) -> Self {
        Self {
            handoff,
            plant,
            hw,
            vbus,
            v_latched: 0.,
            i_alpha: 0.,
            ticks: 0,
        }
    }
}

impl Axis for SimAxis {
    fn wait_for_current_meas(&mut self) -> Option<PhaseCurrents> {
        self.ticks += 1;

        let period = self.hw.current_meas_period();
        match self.plant {
            PlantModel::Resistive { r } => self.i_alpha = self.v_latched / r,
            PlantModel::Inductive { l } => self.i_alpha += self.v_latched / l * period,
            PlantModel::SeriesRl { r, l } => {
                self.i_alpha += (self.v_latched - r * self.i_alpha) / l * period
            }
        }

        if let Some([t_a, t_b, t_c]) = self.handoff.take() {
            let clocks = self.hw.period_clocks as f32;
            let (m_alpha, _m_beta) =
                svm_inverse(t_a as f32 / clocks, t_b as f32 / clocks, t_c as f32 / clocks);
            self.v_latched = m_alpha * (2. / 3.) * self.vbus;
        }

        // Balanced winding: the phase-A current splits evenly over B and C.
        Some(PhaseCurrents {
            ph_b: -0.5 * self.i_alpha,
            ph_c: -0.5 * self.i_alpha,
        })
    }
    fn sample_encoder_now(&mut self) {}
    fn controller_reset(&mut self) {}
    fn motor_failed(&mut self) {}
    fn update_brake_current(&mut self) {}
}

pub type TestMotor<X> = Motor<MockPwm, MockGateDriver, SnapAmp, X>;

/// Shared handles into a `StubAxis` after the motor takes ownership of it.
#[derive(Clone, Default)]
pub struct AxisProbe {
    pub meas: Rc<RefCell<PhaseCurrents>>,
    pub failures: Rc<RefCell<u32>>,
}

/// Motor over a stub axis, set up and ready for direct-call tests.
pub fn stub_motor(
    config: MotorConfig,
) -> (
    TestMotor<StubAxis>,
    PwmProbe,
    AxisProbe,
    &'static TimingsHandoff,
) {
    let handoff = leak_handoff();
    let probe = PwmProbe::default();
    let axis_probe = AxisProbe::default();
    let mut motor = Motor::new(
        MockPwm(probe.clone()),
        MockGateDriver::default(),
        SnapAmp,
        StubAxis {
            meas: axis_probe.meas.clone(),
            failures: axis_probe.failures.clone(),
        },
        handoff,
        HwConfig::default(),
        config,
    );
    assert!(motor.setup());
    (motor, probe, axis_probe, handoff)
}

/// Motor over the plant simulation, set up, for calibration runs.
pub fn sim_motor(
    config: MotorConfig,
    plant: PlantModel,
    vbus: f32,
) -> (TestMotor<SimAxis>, PwmProbe, &'static TimingsHandoff) {
    let handoff = leak_handoff();
    let probe = PwmProbe::default();
    let hw = HwConfig::default();
    let mut motor = Motor::new(
        MockPwm(probe.clone()),
        MockGateDriver::default(),
        SnapAmp,
        SimAxis::new(handoff, plant, hw, vbus),
        handoff,
        hw,
        config,
    );
    motor.vbus_voltage = vbus;
    assert!(motor.setup());
    (motor, probe, handoff)
}

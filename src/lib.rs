//! Field-oriented control core for brushless PM and AC induction motor
//! drives.
//!
//! Given a torque command, an electrical phase angle and velocity, the core
//! synthesises three-phase PWM duty counts that regulate the stator currents
//! to their reference, while enforcing current, voltage, thermal and
//! modulation-saturation limits. The hot path is deterministic: no
//! allocation, no blocking, one pass per PWM period.
//!
//! Hardware enters through the traits in [`hw`]; the PWM reload ISR is wired
//! to [`Motor::tim_update_cb`] and fed duty counts through a
//! [`TimingsHandoff`] placed in a `static`. Every fault floats the bridge and
//! stays latched until the supervisor clears it and re-arms.

#![no_std]

#[macro_use]
mod fmt;

pub mod calibration;
pub mod controller;
pub mod current_sense;
pub mod hw;
pub mod motor;
pub mod safety;
pub mod state;
pub mod transforms;
pub mod util;

pub use controller::CurrentControl;
pub use hw::{Axis, CurrentAmplifier, GateDriver, HwConfig, PhaseCurrents, PwmTimer, Thermistor};
pub use motor::{Motor, TimingLog, TimingLogSlot};
pub use safety::{ArmState, TimingsHandoff};
pub use state::{MotorConfig, MotorError, MotorType};

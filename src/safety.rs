//! This code contains safety-related code: arming, disarming, fault latching,
//! and the per-period deadline on fresh PWM timings. Anything anomalous ends
//! with the bridge floated via the hardware break signals.

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use crate::{
    hw::{Axis, CurrentAmplifier, GateDriver, PwmTimer},
    motor::Motor,
    state::MotorError,
};

/// Master bridge arm status. PWM outputs follow the compare registers only in
/// `Armed`; both other states force tri-state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmState {
    /// Outputs floated. The default, and the destination of every fault.
    Disarmed,
    /// `arm()` in progress: controller state reset, waiting out a full
    /// control quantum before the hardware unlock.
    Arming,
    /// Outputs live, consuming one timing triple per PWM period.
    Armed,
}

impl Default for ArmState {
    fn default() -> Self {
        Self::Disarmed
    }
}

/// Single-slot handoff of duty counts from the control context to the PWM
/// reload ISR. Written by `enqueue_modulation_timings`, consumed (and
/// invalidated) once per reload; a reload that finds the slot empty is a
/// missed control deadline.
///
/// `const`-constructible so it can live in a `static` visible to both
/// contexts. Publication order: the three counts are stored relaxed, then the
/// valid flag with release; the consumer acquires on the flag, so a single
/// producer and single consumer need no lock.
pub struct TimingsHandoff {
    timings: [AtomicU16; 3],
    valid: AtomicBool,
}

impl TimingsHandoff {
    pub const fn new() -> Self {
        Self {
            timings: [AtomicU16::new(0), AtomicU16::new(0), AtomicU16::new(0)],
            valid: AtomicBool::new(false),
        }
    }

    /// Publish a fresh triple, replacing any unconsumed one.
    pub fn publish(&self, timings: [u16; 3]) {
        for (slot, t) in self.timings.iter().zip(timings) {
            slot.store(t, Ordering::Relaxed);
        }
        self.valid.store(true, Ordering::Release);
    }

    /// Consume the pending triple, leaving the slot empty.
    pub fn take(&self) -> Option<[u16; 3]> {
        if self.valid.swap(false, Ordering::Acquire) {
            Some([
                self.timings[0].load(Ordering::Relaxed),
                self.timings[1].load(Ordering::Relaxed),
                self.timings[2].load(Ordering::Relaxed),
            ])
        } else {
            None
        }
    }

    /// Drop any pending triple without consuming it.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

impl<P, G, A, X> Motor<P, G, A, X>
where
    P: PwmTimer,
    G: GateDriver,
    A: CurrentAmplifier,
    X: Axis,
{
    /// Arm the bridge. Resets the current controller and the outer
    /// controllers, waits two measurement events so the control loop owns a
    /// full quantum, then unlocks the PWM hardware.
    ///
    /// The first reload after arming already expects fresh timings; the
    /// caller must start feeding `update` (or calibration voltages)
    /// immediately.
    pub fn arm(&mut self) -> bool {
        self.axis.controller_reset();
        self.reset_current_control();
        self.arm_state = ArmState::Arming;

        for _ in 0..2 {
            match self.axis.wait_for_current_meas() {
                Some(meas) => self.current_meas = meas,
                None => {
                    self.arm_state = ArmState::Disarmed;
                    self.set_error(MotorError::CURRENT_MEASUREMENT_TIMEOUT);
                    return false;
                }
            }
        }

        self.axis.sample_encoder_now();
        self.timings.invalidate();
        self.pwm.arm();
        self.arm_state = ArmState::Armed;
        info!("motor armed");
        true
    }

    /// Orderly shutdown: float the bridge and drop any pending timings.
    /// Not a fault by itself; `set_error` routes through here.
    pub fn disarm(&mut self) {
        self.arm_state = ArmState::Disarmed;
        self.pwm.disarm();
        self.timings.invalidate();
        self.axis.update_brake_current();
        info!("motor disarmed");
    }

    /// Latch a fault: accumulate the kind, tell the axis, float the bridge.
    /// Bits stay set until `clear_errors`; re-arming requires an explicit
    /// `arm()` after that.
    pub(crate) fn set_error(&mut self, err: MotorError) {
        error!("motor fault: {=u32:b}", err.bits());
        self.error.insert(err);
        self.axis.motor_failed();
        self.disarm();
    }

    /// PWM timer update (reload) ISR hook. While armed, consumes the pending
    /// timing triple into the compare registers; finding none means the
    /// control loop missed its period and the bridge floats.
    pub fn tim_update_cb(&mut self) {
        if self.arm_state != ArmState::Armed {
            return;
        }
        match self.timings.take() {
            Some(timings) => self.pwm.apply_timings(timings),
            None => self.set_error(MotorError::CONTROL_DEADLINE_MISSED),
        }
    }
}

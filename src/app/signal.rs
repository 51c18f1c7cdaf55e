// MrcSleuth - app/signal.rs
//
// Fault signalling through a PWM LED board (PCA9685) mounted next to the
// DIMM slots of socket 0. Each pair of ranks on one DIMM shares an LED; the
// LED brightness encodes the severity.
//
// The PWM hardware sits behind `PwmDriver`. The shipped driver only logs
// what it would write, so the CLI behaves the same with or without a board.

use crate::core::collab::FaultSignal;
use crate::core::model::{FaultEvent, Severity};
use crate::platform::config::LedConfig;
use crate::util::constants;
use regex::Regex;
use std::io;
use std::sync::OnceLock;

/// A PWM output stage.
pub trait PwmDriver {
    /// Set `channel` to `percent` duty cycle.
    fn set_duty(&mut self, channel: u8, percent: u8) -> io::Result<()>;
}

/// Driver that records each write in the log instead of touching a bus.
#[derive(Debug, Clone)]
pub struct TracingPwm {
    config: LedConfig,
}

impl TracingPwm {
    pub fn new(config: LedConfig) -> Self {
        tracing::debug!(
            bus = config.i2c_bus,
            address = %format!("{:#09b}", config.address),
            frequency_hz = config.pwm_frequency_hz,
            "LED driver initialised"
        );
        Self { config }
    }
}

impl PwmDriver for TracingPwm {
    fn set_duty(&mut self, channel: u8, percent: u8) -> io::Result<()> {
        tracing::info!(
            bus = self.config.i2c_bus,
            channel,
            percent,
            "LED set"
        );
        Ok(())
    }
}

/// LED channel for a device identity, if the board has one for it.
///
/// The board covers socket 0, channels 0-3, DIMMs 0-1; both ranks of a DIMM
/// share the LED at `4 * channel + 2 * dimm`.
pub fn led_channel(device: &str) -> Option<u8> {
    static DEVICE: OnceLock<Regex> = OnceLock::new();
    let re = DEVICE.get_or_init(|| {
        Regex::new(r"^N0\.C([0-3])\.D([01])\.R[01]$").expect("LED device regex")
    });
    let caps = re.captures(device)?;
    let channel: u8 = caps[1].parse().ok()?;
    let dimm: u8 = caps[2].parse().ok()?;
    let led = channel * 4 + dimm * 2;
    (led < constants::LED_CHANNEL_COUNT).then_some(led)
}

/// Duty cycle for a severity.
pub fn duty_for(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => constants::LED_DUTY_CRITICAL,
        Severity::Warning => constants::LED_DUTY_WARNING,
    }
}

/// Lights the LED of each faulty DIMM.
pub struct LedSignal<D: PwmDriver> {
    driver: D,
}

impl<D: PwmDriver> LedSignal<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn into_driver(self) -> D {
        self.driver
    }
}

impl<D: PwmDriver> FaultSignal for LedSignal<D> {
    fn signal(&mut self, event: &FaultEvent) {
        let Some(channel) = led_channel(&event.device) else {
            tracing::debug!(device = %event.device, "No LED for device");
            return;
        };
        let duty = duty_for(event.severity);
        if let Err(e) = self.driver.set_duty(channel, duty) {
            tracing::warn!(device = %event.device, channel, error = %e, "LED write failed");
        }
    }
}

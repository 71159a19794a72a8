//! # Self-Test Scanner
//!
//! Fixture health check, independent of any plan:
//!
//! 1. Run the meter's built-in self-test. On failure stop here.
//! 2. Discharge every pin against the reference pin and prepare the meter
//!    with a fixed range.
//! 3. For every pin in `1..=pin_count`, route the pin to both lines (a
//!    loop through its own relays) and measure. Pins reading
//!    `>= 1 Ω` are recorded in scan order.
//!
//! A scan cancelled at any point before it returns yields no result at all,
//! even when the meter self-test already failed.


use tracing::{debug, info, warn};

use crate::matrix::SwitchMatrix;
use crate::meter::MeterSession;
use crate::run::RunGuard;
use crate::{PinCheckConfig, PinCheckError};

/// Loop resistance a healthy pin must stay below.
pub const SELF_TEST_MAX_OHMS: f64 = 1.0;

/// Outcome of a completed self-test.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfTestResult {
    /// Meter self-test passed and every pin stayed below the threshold.
    pub pass: bool,
    /// Meter self-test report.
    pub message: String,
    /// `(pin, ohms)` of every failing pin, in scan order.
    pub fail_pins: Vec<(u16, f64)>,
}

impl SelfTestResult {
    pub fn failed_pins(&self) -> impl Iterator<Item = u16> + '_ {
        self.fail_pins.iter().map(|&(pin, _)| pin)
    }
}

fn meter_message(message: &str, code: i32) -> String {
    format!("DMM Self Test:\n\tSelf test result: {message}\n\tCode: {code}")
}

/// Runs the scan while `run` holds the handle.
///
/// Returns `Ok(None)` when cancelled. Any driver fault aborts the scan.
pub fn run_scan(
    config: &PinCheckConfig,
    matrix: &mut SwitchMatrix,
    meter: &mut MeterSession<'_>,
    run: &RunGuard<'_>,
) -> Result<Option<SelfTestResult>, PinCheckError> {
    let report = meter.self_test();
    let message = meter_message(&report.message, report.code);

    if !report.passed() {
        warn!(code = report.code, "meter self-test failed");
        if run.is_cancelled() {
            warn!("self-test cancelled");
            return Ok(None);
        }
        return Ok(Some(SelfTestResult {
            pass: false,
            message,
            fail_pins: Vec::new(),
        }));
    }

    info!(pins = config.pin_count, "self-test scan started");

    matrix.discharge_all(
        config.pin_count,
        &[config.self_test_reference_pin],
        config.discharge_chunk_size,
    )?;

    let mut settings = config.meter.clone();
    settings.auto_range = false;
    meter.prepare(&settings)?;

    let mut fail_pins = Vec::new();
    for pin in 1..=config.pin_count {
        if run.is_cancelled() {
            warn!(pin, "self-test cancelled");
            if let Err(e) = matrix.clear() {
                warn!("clear after cancelled self-test failed: {e}");
            }
            return Ok(None);
        }

        matrix.clear()?;
        matrix.set_matrix(&[pin], &[pin])?;
        let ohms = meter.measure()?;

        if ohms.is_nan() || ohms >= SELF_TEST_MAX_OHMS {
            debug!(pin, ohms, "pin failed self-test");
            fail_pins.push((pin, ohms));
        }
    }
    matrix.clear()?;

    if run.is_cancelled() {
        warn!("self-test cancelled after the last pin");
        return Ok(None);
    }

    let pass = fail_pins.is_empty();
    info!(pass, failed = fail_pins.len(), "self-test scan finished");
    Ok(Some(SelfTestResult {
        pass,
        message,
        fail_pins,
    }))
}

//! # Meter Session
//!
//! Scoped use of the [`ResistanceMeter`] for one run: the session is
//! prepared (reset + 4-wire configuration) before the first reading and
//! the driver is closed when the session is dropped, on every exit path.


use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::driver::{MeterFault, MeterSelfTest, MeterSettings, ResistanceMeter};

/// Meter driver operation, carried in [`MeterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterOp {
    Reset,
    Configure,
    Read,
}

impl fmt::Display for MeterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MeterOp::Reset => "reset",
            MeterOp::Configure => "configure",
            MeterOp::Read => "read",
        })
    }
}

/// A meter driver call failed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("meter {op} failed: {fault}")]
pub struct MeterError {
    pub op: MeterOp,
    #[source]
    pub fault: MeterFault,
}

/// Borrowed meter for the duration of one run.
pub struct MeterSession<'a> {
    meter: &'a mut dyn ResistanceMeter,
}

impl<'a> MeterSession<'a> {
    pub fn new(meter: &'a mut dyn ResistanceMeter) -> Self {
        Self { meter }
    }

    /// Resets the meter and configures a 4-wire resistance measurement.
    pub fn prepare(&mut self, settings: &MeterSettings) -> Result<(), MeterError> {
        self.meter
            .reset()
            .map_err(|fault| MeterError { op: MeterOp::Reset, fault })?;
        self.meter
            .configure_four_wire_resistance(settings)
            .map_err(|fault| MeterError { op: MeterOp::Configure, fault })?;

        debug!(auto_range = settings.auto_range, "meter configured");
        Ok(())
    }

    /// Takes one reading. `NaN` means the meter overflowed (open circuit).
    pub fn measure(&mut self) -> Result<f64, MeterError> {
        let ohms = self
            .meter
            .read()
            .map_err(|fault| MeterError { op: MeterOp::Read, fault })?;
        trace!(ohms, "meter reading");
        Ok(ohms)
    }

    pub fn self_test(&mut self) -> MeterSelfTest {
        self.meter.self_test()
    }
}

impl Drop for MeterSession<'_> {
    fn drop(&mut self) {
        self.meter.close();
    }
}

//! # Device Gateway
//!
//! The interface device accepts exactly one transaction at a time. Every
//! call into the [`SpiDioDriver`] goes through [`DeviceGateway::execute`],
//! which holds a single mutex for the duration of **one** driver call.
//! The lock is never held across a batch, so cancellation polling between
//! calls stays responsive.
//!
//! The gateway is cheap to clone; all clones share the same driver and
//! the same lock.


use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{error, trace};

use crate::driver::{SpiDioDriver, StatusCode};

// ------------------------------------------------------------------------------------------------
// Operation names
// ------------------------------------------------------------------------------------------------

/// The driver call a gateway invocation performs. Carried in errors so a
/// fault names the step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    FindDevice,
    Open,
    Close,
    SetIoVoltageLevel,
    SetDriverType,
    ConfigurationOpen,
    ConfigurationClose,
    SetChipSelect,
    SetPort,
    SetClockRate,
    SetClockPolarity,
    SetClockPhase,
    SetBitsPerSample,
    SpiWriteRead,
    DioSetPortDirectionMap,
    DioWritePort,
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceOp::FindDevice => "find_device",
            DeviceOp::Open => "open",
            DeviceOp::Close => "close",
            DeviceOp::SetIoVoltageLevel => "set_io_voltage_level",
            DeviceOp::SetDriverType => "set_driver_type",
            DeviceOp::ConfigurationOpen => "configuration_open",
            DeviceOp::ConfigurationClose => "configuration_close",
            DeviceOp::SetChipSelect => "configuration_set_chip_select",
            DeviceOp::SetPort => "configuration_set_port",
            DeviceOp::SetClockRate => "configuration_set_clock_rate",
            DeviceOp::SetClockPolarity => "configuration_set_clock_polarity",
            DeviceOp::SetClockPhase => "configuration_set_clock_phase",
            DeviceOp::SetBitsPerSample => "configuration_set_bits_per_sample",
            DeviceOp::SpiWriteRead => "spi_write_read",
            DeviceOp::DioSetPortDirectionMap => "dio_set_port_direction_map",
            DeviceOp::DioWritePort => "dio_write_port",
        };
        f.write_str(name)
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced by gateway calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    /// The driver returned a non-success status.
    #[error("{op} failed: {status}")]
    Status { op: DeviceOp, status: StatusCode },

    /// A previous caller panicked while holding the gateway lock.
    #[error("device gateway lock poisoned")]
    Poisoned,
}

impl DeviceError {
    /// The driver status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DeviceError::Status { status, .. } => Some(*status),
            DeviceError::Poisoned => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Gateway
// ------------------------------------------------------------------------------------------------

/// Single serializing entry point for all interface-driver calls.
pub struct DeviceGateway {
    driver: Arc<Mutex<Box<dyn SpiDioDriver>>>,
}

impl Clone for DeviceGateway {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
        }
    }
}

impl fmt::Debug for DeviceGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceGateway").finish_non_exhaustive()
    }
}

impl DeviceGateway {
    pub fn new(driver: impl SpiDioDriver + 'static) -> Self {
        Self {
            driver: Arc::new(Mutex::new(Box::new(driver))),
        }
    }

    /// Runs one driver call under the gateway lock.
    ///
    /// The lock is released before this returns. A failing status is
    /// wrapped together with `op`; the raw code is preserved.
    pub fn execute<T>(
        &self,
        op: DeviceOp,
        call: impl FnOnce(&mut dyn SpiDioDriver) -> Result<T, StatusCode>,
    ) -> Result<T, DeviceError> {
        let mut driver = self.driver.lock().map_err(|_| DeviceError::Poisoned)?;

        trace!(%op, "device call");
        match call(driver.as_mut()) {
            Ok(value) => Ok(value),
            Err(status) => {
                error!(%op, code = status.code(), "device call failed: {status}");
                Err(DeviceError::Status { op, status })
            }
        }
    }
}

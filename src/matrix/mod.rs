//! # Relay Command Executor
//!
//! [`SwitchMatrix`] turns lists of [`ShiftSelection`]s into SPI traffic on
//! the interface device and owns the device session for the duration of a
//! run.
//!
//! ## Session
//!
//! The device is found and opened lazily on first use and then kept open
//! across calls. Opening also applies the fixed I/O voltage and DIO driver
//! type; the session only counts as connected once that setup succeeds.
//! The session is closed by [`SwitchMatrix::disconnect`] or, failing that,
//! when the matrix is dropped.
//!
//! ## Command batches
//!
//! [`SwitchMatrix::apply_commands`] opens one SPI configuration context per
//! batch, applies the link parameters, then writes every selection as two
//! fixed-width transfers (one per 64-bit half of the chip select's 128-bit
//! word). The configuration context is always closed again; the first
//! failure in the batch is what the caller sees.
//!
//! Every driver call goes through the [`DeviceGateway`], one lock
//! acquisition per call.

mod sequencer;

#[cfg(test)]
mod tests;

pub use sequencer::{CLEAR_PATTERN, DIO_ALL_OUTPUT};

use tracing::{debug, info, trace, warn};

use crate::address::{self, REGISTERS_PER_CHIP_SELECT, ShiftSelection};
use crate::driver::{ConfigHandle, DeviceHandle, LinkSettings};
use crate::gateway::{DeviceError, DeviceGateway, DeviceOp};

/// SPI transfer width: one 64-bit half of a chip select's word.
pub const TRANSFER_BITS: u16 = 64;

/// An open device session.
#[derive(Debug, Clone)]
struct Session {
    handle: DeviceHandle,
    resource: String,
    devices_found: u32,
}

/// Relay switch matrix driven through the interface device.
pub struct SwitchMatrix {
    gateway: DeviceGateway,
    link: LinkSettings,
    session: Option<Session>,
}

impl std::fmt::Debug for SwitchMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchMatrix")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SwitchMatrix {
    /// Creates a matrix over `gateway`. No driver is called yet.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::TransferWidth`] unless `link.bits_per_sample`
    /// is [`TRANSFER_BITS`]; any other width would drop register lanes.
    pub fn new(gateway: DeviceGateway, link: LinkSettings) -> Result<Self, MatrixError> {
        if link.bits_per_sample != TRANSFER_BITS {
            return Err(MatrixError::TransferWidth {
                bits: link.bits_per_sample,
            });
        }
        Ok(Self {
            gateway,
            link,
            session: None,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Session lifecycle
    // --------------------------------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Number of interface devices reported when the session was opened.
    pub fn devices_found(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.devices_found)
    }

    /// Finds and opens the device if no session is open yet.
    pub fn connect(&mut self) -> Result<DeviceHandle, DeviceError> {
        if let Some(session) = &self.session {
            return Ok(session.handle);
        }

        let (resource, devices_found) = self
            .gateway
            .execute(DeviceOp::FindDevice, |d| d.find_device())?;
        let handle = self
            .gateway
            .execute(DeviceOp::Open, |d| d.open(&resource))?;

        if let Err(e) = self.setup_device(handle) {
            // Do not leak a half-configured session.
            let _ = self.gateway.execute(DeviceOp::Close, |d| d.close(handle));
            return Err(e);
        }

        info!(%resource, devices_found, "relay interface opened");
        self.session = Some(Session {
            handle,
            resource,
            devices_found,
        });
        Ok(handle)
    }

    fn setup_device(&self, handle: DeviceHandle) -> Result<(), DeviceError> {
        let voltage = self.link.io_voltage;
        let drive = self.link.drive_mode;
        let port = self.link.dio_port;

        self.gateway.execute(DeviceOp::SetIoVoltageLevel, |d| {
            d.set_io_voltage_level(handle, voltage)
        })?;
        self.gateway.execute(DeviceOp::SetDriverType, |d| {
            d.set_driver_type(handle, port, drive)
        })
    }

    /// Closes the session. Harmless if already closed.
    pub fn disconnect(&mut self) -> Result<(), DeviceError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let handle = session.handle;
        self.gateway.execute(DeviceOp::Close, |d| d.close(handle))?;
        info!(resource = %session.resource, "relay interface closed");
        Ok(())
    }

    pub(crate) fn gateway(&self) -> &DeviceGateway {
        &self.gateway
    }

    pub(crate) fn link(&self) -> &LinkSettings {
        &self.link
    }

    // --------------------------------------------------------------------------------------------
    // Matrix operations
    // --------------------------------------------------------------------------------------------

    /// Routes `zap` pins to the test line and `ground` pins to the reference line.
    pub fn set_matrix(&mut self, zap: &[u16], ground: &[u16]) -> Result<(), MatrixError> {
        let selections = address::merge(zap, ground)?;
        self.apply_commands(&selections)?;
        Ok(())
    }

    /// Writes a batch of selections in a single configuration context.
    ///
    /// Stops at the first failing write; the configuration is closed in any
    /// case and the first failure is returned unchanged.
    pub fn apply_commands(&mut self, selections: &[ShiftSelection]) -> Result<(), DeviceError> {
        let device = self.connect()?;
        let config = self
            .gateway
            .execute(DeviceOp::ConfigurationOpen, |d| d.configuration_open())?;

        let written = self
            .configure_link(config)
            .and_then(|()| self.write_selections(device, config, selections));

        let closed = self
            .gateway
            .execute(DeviceOp::ConfigurationClose, |d| d.configuration_close(config));

        match (written, closed) {
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("configuration close after failed batch also failed: {close_err}");
                }
                Err(e)
            }
            (Ok(()), closed) => closed,
        }
    }

    fn configure_link(&self, config: ConfigHandle) -> Result<(), DeviceError> {
        let link = &self.link;
        let gw = &self.gateway;

        gw.execute(DeviceOp::SetBitsPerSample, |d| {
            d.configuration_set_bits_per_sample(config, link.bits_per_sample)
        })?;
        gw.execute(DeviceOp::SetPort, |d| {
            d.configuration_set_port(config, link.spi_port)
        })?;
        gw.execute(DeviceOp::SetClockRate, |d| {
            d.configuration_set_clock_rate(config, link.clock_rate_khz)
        })?;
        gw.execute(DeviceOp::SetClockPolarity, |d| {
            d.configuration_set_clock_polarity(config, link.clock_polarity)
        })?;
        gw.execute(DeviceOp::SetClockPhase, |d| {
            d.configuration_set_clock_phase(config, link.clock_phase)
        })
    }

    fn write_selections(
        &self,
        device: DeviceHandle,
        config: ConfigHandle,
        selections: &[ShiftSelection],
    ) -> Result<(), DeviceError> {
        let width = self.link.transfer_bytes();
        debug!(count = selections.len(), "writing relay selections");

        for sel in selections {
            let chip_select = u32::from(sel.chip_select);
            self.gateway.execute(DeviceOp::SetChipSelect, |d| {
                d.configuration_set_chip_select(config, chip_select)
            })?;

            for half in register_halves(sel, width) {
                trace!(
                    chip_select = sel.chip_select,
                    register = sel.register,
                    value = sel.value,
                    ?half,
                    "spi transfer"
                );
                let mut read_back = vec![0u8; width];
                self.gateway.execute(DeviceOp::SpiWriteRead, |d| {
                    d.spi_write_read(device, config, &half, &mut read_back)
                })?;
            }
        }
        Ok(())
    }
}

impl Drop for SwitchMatrix {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _ = self.disconnect();
        }
    }
}

/// Splits a selection into the two transfers that load a chip select's
/// word: lanes `0..width` first, then lanes `width..2*width`. Every lane
/// except `sel.register` is zero.
pub(crate) fn register_halves(sel: &ShiftSelection, width: usize) -> [Vec<u8>; 2] {
    let mut word = vec![0u8; (width * 2).max(usize::from(REGISTERS_PER_CHIP_SELECT))];
    word[usize::from(sel.register)] = sel.value;

    let second = word[width..width * 2].to_vec();
    word.truncate(width);
    [word, second]
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors from matrix operations taking logical pins.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatrixError {
    #[error("{0}")]
    Address(#[from] address::AddressError),

    #[error("{0}")]
    Device(#[from] DeviceError),

    #[error("unsupported transfer width: {bits} bits (expected {TRANSFER_BITS})")]
    TransferWidth { bits: u16 },
}

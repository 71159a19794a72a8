//! Discharge and clear sequences run before every matrix reconfiguration.

use tracing::debug;

use super::{MatrixError, SwitchMatrix};
use crate::address::{CHIP_SELECT_COUNT, ShiftSelection};
use crate::gateway::{DeviceError, DeviceOp};

/// Direction map putting every line of the DIO port into output mode.
pub const DIO_ALL_OUTPUT: u8 = 0xFF;

/// Values pulsed on the DIO port to release the relay latches.
pub const CLEAR_PATTERN: [u8; 4] = [0, 1, 0, 1];

impl SwitchMatrix {
    /// Releases every relay.
    ///
    /// Pulses [`CLEAR_PATTERN`] on the DIO port, then writes a zero
    /// selection to every chip select.
    pub fn clear(&mut self) -> Result<(), DeviceError> {
        let device = self.connect()?;
        let port = self.link().dio_port;
        let gw = self.gateway();

        gw.execute(DeviceOp::DioSetPortDirectionMap, |d| {
            d.dio_set_port_direction_map(device, port, DIO_ALL_OUTPUT)
        })?;
        for value in CLEAR_PATTERN {
            gw.execute(DeviceOp::DioWritePort, |d| {
                d.dio_write_port(device, port, value)
            })?;
        }

        let zeroes: Vec<ShiftSelection> = (0..CHIP_SELECT_COUNT).map(ShiftSelection::zero).collect();
        self.apply_commands(&zeroes)
    }

    /// Ties every pin in `1..=pin_count` to `ground`, `chunk_size` pins at a
    /// time, to bleed residual charge.
    pub fn discharge_all(
        &mut self,
        pin_count: u16,
        ground: &[u16],
        chunk_size: usize,
    ) -> Result<(), MatrixError> {
        let chunk_size = chunk_size.max(1);
        let pins: Vec<u16> = (1..=pin_count).collect();
        debug!(pin_count, chunks = pins.len().div_ceil(chunk_size), "discharging");

        for chunk in pins.chunks(chunk_size) {
            self.set_matrix(chunk, ground)?;
        }
        Ok(())
    }
}

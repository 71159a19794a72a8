//! # Address Encoder
//!
//! Translates **logical pin channels** (1-based) into the shift-register
//! bit patterns that drive the relay banks.
//!
//! ## Board geometry
//!
//! - 8 chip selects, each driving a chain of 16 byte-wide registers
//!   (64 channels per chip select).
//! - Every register controls 4 channels. Each channel owns two bits in the
//!   register: one routing it to the **zap** (test) line, one routing it to
//!   the **ground** (reference) line.
//!
//! ```text
//! bit:      7    6    5    4    3    2    1    0
//!         +----+----+----+----+----+----+----+----+
//!         | G3 | Z3 | G2 | Z2 | G1 | Z1 | G0 | Z0 |
//!         +----+----+----+----+----+----+----+----+
//! ```
//!
//! The zap weights `{1, 4, 16, 64}` and ground weights `{2, 8, 32, 128}`
//! are disjoint, so a channel may carry both roles at once.
//!
//! ## Merging
//!
//! [`merge`] encodes a full zap list and ground list and collapses them
//! into one [`ShiftSelection`] per `(chip_select, register)` pair, summing
//! the contributing weights. Output is sorted by that pair ascending.
//!
//! All functions here are pure.


use std::collections::BTreeMap;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Channels addressed by a single chip select.
pub const CHANNELS_PER_CHIP_SELECT: u16 = 64;

/// Channels sharing one register byte.
pub const CHANNELS_PER_REGISTER: u16 = 4;

/// Byte-wide registers in one chip-select chain.
pub const REGISTERS_PER_CHIP_SELECT: u8 = 16;

/// Number of chip-select chains on the relay board.
pub const CHIP_SELECT_COUNT: u8 = 8;

/// Size of the fixed pin universe.
pub const MAX_CHANNEL: u16 = CHANNELS_PER_CHIP_SELECT * CHIP_SELECT_COUNT as u16;

/// Bit weights routing a channel to the zap (test) line, by sub-index.
pub const ZAP_WEIGHTS: [u8; 4] = [1, 4, 16, 64];

/// Bit weights routing a channel to the ground (reference) line, by sub-index.
pub const GROUND_WEIGHTS: [u8; 4] = [2, 8, 32, 128];

// ------------------------------------------------------------------------------------------------
// Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the encoder.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Channel outside `1..=MAX_CHANNEL`.
    #[error("channel {0} is outside 1..=512")]
    ChannelOutOfRange(u16),
}

/// Which relay line a channel is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    /// Test line, probed by the meter's HI side.
    Zap,
    /// Reference line, tied to the meter's LO side.
    Ground,
}

impl PinRole {
    /// Bit weight for the given sub-index (`(channel - 1) % 4`).
    pub fn weight(self, sub_index: usize) -> u8 {
        match self {
            PinRole::Zap => ZAP_WEIGHTS[sub_index % ZAP_WEIGHTS.len()],
            PinRole::Ground => GROUND_WEIGHTS[sub_index % GROUND_WEIGHTS.len()],
        }
    }
}

/// One register write: `value` goes to byte lane `register` of the
/// chain selected by `chip_select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShiftSelection {
    /// Chip-select index, `0..8`.
    pub chip_select: u8,
    /// Register (byte-lane) index within the chain, `0..16`.
    pub register: u8,
    /// Sum of the contributing bit weights.
    pub value: u8,
}

impl ShiftSelection {
    /// A selection that writes nothing but zeroes to `chip_select`.
    pub fn zero(chip_select: u8) -> Self {
        Self {
            chip_select,
            register: 0,
            value: 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Encoding
// ------------------------------------------------------------------------------------------------

fn check_channel(channel: u16) -> Result<u16, AddressError> {
    if channel == 0 || channel > MAX_CHANNEL {
        return Err(AddressError::ChannelOutOfRange(channel));
    }
    Ok(channel - 1)
}

/// Chip-select index of `channel`: `(c - 1) / 64`.
pub fn chip_select_index(channel: u16) -> Result<u8, AddressError> {
    let zero_based = check_channel(channel)?;
    Ok((zero_based / CHANNELS_PER_CHIP_SELECT) as u8)
}

/// Register index of `channel`: `15 - ((c - 1) % 64) / 4`.
///
/// Registers are numbered from the far end of the chain, so the lowest
/// channels land in the highest byte lane.
pub fn register_index(channel: u16) -> Result<u8, AddressError> {
    let zero_based = check_channel(channel)?;
    let lane = (zero_based % CHANNELS_PER_CHIP_SELECT) / CHANNELS_PER_REGISTER;
    Ok(REGISTERS_PER_CHIP_SELECT - 1 - lane as u8)
}

/// Encodes a single channel in the given role.
pub fn encode(channel: u16, role: PinRole) -> Result<ShiftSelection, AddressError> {
    let zero_based = check_channel(channel)?;
    let sub_index = (zero_based % CHANNELS_PER_REGISTER) as usize;

    Ok(ShiftSelection {
        chip_select: chip_select_index(channel)?,
        register: register_index(channel)?,
        value: role.weight(sub_index),
    })
}

/// Encodes every channel in `channels` in the given role, preserving order.
pub fn encode_all(channels: &[u16], role: PinRole) -> Result<Vec<ShiftSelection>, AddressError> {
    channels.iter().map(|&c| encode(c, role)).collect()
}

/// Encodes both roles and merges them into the minimal ordered command list.
///
/// Selections sharing a `(chip_select, register)` pair are collapsed and
/// their values summed. Listing the same channel twice in the same role is
/// not detected; the sum wraps like the byte register it models.
pub fn merge(zap: &[u16], ground: &[u16]) -> Result<Vec<ShiftSelection>, AddressError> {
    let mut lanes: BTreeMap<(u8, u8), u8> = BTreeMap::new();

    let zap_selections = encode_all(zap, PinRole::Zap)?;
    let ground_selections = encode_all(ground, PinRole::Ground)?;

    for sel in zap_selections.into_iter().chain(ground_selections) {
        let lane = lanes.entry((sel.chip_select, sel.register)).or_insert(0);
        *lane = lane.wrapping_add(sel.value);
    }

    Ok(lanes
        .into_iter()
        .map(|((chip_select, register), value)| ShiftSelection {
            chip_select,
            register,
            value,
        })
        .collect())
}

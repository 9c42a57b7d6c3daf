//! Wire codec for the JCP35N-BLT desk control box.
//!
//! Command frames written to the "data in" characteristic share one layout:
//! `F1 F1 <opcode> <len> <payload..> <checksum> 7E`. The checksum is the
//! modulo-256 sum of every byte between the preamble and the checksum itself.
//! Height notifications arrive on the "data out" characteristic and carry the
//! current height in millimetres at a fixed offset from the end of the frame.
//!
//! Frame layouts were recovered from captures of the vendor app and must stay
//! byte-for-byte identical.

use core::fmt;
use core::ops::Deref;

use winnow::binary::length_take;
use winnow::combinator::{eof, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{any, literal};

/// Preamble of every frame sent to the control box.
pub const COMMAND_PREAMBLE: [u8; 2] = [0xF1, 0xF1];
/// Preamble of every frame emitted by the control box.
pub const NOTIFICATION_PREAMBLE: [u8; 2] = [0xF2, 0xF2];
/// Trailing byte shared by commands and notifications.
pub const FRAME_TERMINATOR: u8 = 0x7E;

pub const OPCODE_PRESET_SIT: u8 = 0x05;
pub const OPCODE_PRESET_STAND: u8 = 0x06;
pub const OPCODE_SET_HEIGHT: u8 = 0x1B;
pub const OPCODE_STOP: u8 = 0x2B;
pub const OPCODE_HEIGHT_REPORT: u8 = 0x01;

/// Longest command frame (set-height carries a two byte payload).
pub const MAX_COMMAND_FRAME_LEN: usize = 8;
/// Length of a height notification as produced by [`encode_height_notification`].
pub const NOTIFICATION_FRAME_LEN: usize = 9;
/// Height bytes start this many bytes before the end of a notification.
const HEIGHT_OFFSET_FROM_END: usize = 5;

/// Errors raised while encoding or decoding frames.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CodecError {
    /// Requested height is negative, not finite, or does not fit in 16 bits of millimetres.
    HeightOutOfRange,
    /// Notification is too short to contain a height field.
    FrameTooShort { len: usize },
    /// Frame does not follow the preamble/length/terminator layout.
    Malformed,
    /// Checksum byte disagrees with the frame contents.
    ChecksumMismatch { expected: u8, found: u8 },
    /// Opcode is not one the controller issues.
    UnknownOpcode(u8),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::HeightOutOfRange => f.write_str("height out of range"),
            CodecError::FrameTooShort { len } => {
                write!(f, "frame too short ({len} bytes) for a height field")
            }
            CodecError::Malformed => f.write_str("malformed frame"),
            CodecError::ChecksumMismatch { expected, found } => {
                write!(f, "checksum mismatch: expected {expected:#04x}, found {found:#04x}")
            }
            CodecError::UnknownOpcode(opcode) => write!(f, "unknown opcode {opcode:#04x}"),
        }
    }
}

/// Travel direction for preset moves.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Commands understood by the control box.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ActuatorCommand {
    /// Travel to an absolute height.
    SetHeight { millimeters: u16 },
    /// Halt any motion in progress.
    Stop,
    /// Travel to memory preset 2 (up) or preset 1 (down).
    Preset(Direction),
}

impl ActuatorCommand {
    /// Builds a set-height command for a height in centimetres.
    pub fn set_height_cm(height_cm: f32) -> Result<Self, CodecError> {
        centimeters_to_millimeters(height_cm).map(|millimeters| Self::SetHeight { millimeters })
    }

    const fn opcode(self) -> u8 {
        match self {
            ActuatorCommand::SetHeight { .. } => OPCODE_SET_HEIGHT,
            ActuatorCommand::Stop => OPCODE_STOP,
            ActuatorCommand::Preset(Direction::Up) => OPCODE_PRESET_STAND,
            ActuatorCommand::Preset(Direction::Down) => OPCODE_PRESET_SIT,
        }
    }

    /// Serializes the command into its wire frame.
    #[must_use]
    pub fn encode(self) -> CommandFrame {
        match self {
            ActuatorCommand::SetHeight { millimeters } => {
                CommandFrame::assemble(self.opcode(), &millimeters.to_be_bytes())
            }
            ActuatorCommand::Stop | ActuatorCommand::Preset(_) => {
                CommandFrame::assemble(self.opcode(), &[])
            }
        }
    }
}

/// Fixed-capacity command frame ready to be written to the actuator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommandFrame {
    bytes: [u8; MAX_COMMAND_FRAME_LEN],
    len: usize,
}

impl CommandFrame {
    // Payloads are at most two bytes, so the frame always fits.
    fn assemble(opcode: u8, payload: &[u8]) -> Self {
        let mut bytes = [0u8; MAX_COMMAND_FRAME_LEN];
        bytes[..2].copy_from_slice(&COMMAND_PREAMBLE);
        bytes[2] = opcode;
        #[allow(clippy::cast_possible_truncation)]
        {
            bytes[3] = payload.len() as u8;
        }
        let checksum_at = 4 + payload.len();
        bytes[4..checksum_at].copy_from_slice(payload);
        bytes[checksum_at] = checksum(&bytes[2..checksum_at]);
        bytes[checksum_at + 1] = FRAME_TERMINATOR;

        Self {
            bytes,
            len: checksum_at + 2,
        }
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl Deref for CommandFrame {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Modulo-256 sum of `bytes`.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// Converts centimetres to whole millimetres, rounding to the nearest millimetre.
pub fn centimeters_to_millimeters(height_cm: f32) -> Result<u16, CodecError> {
    let scaled = height_cm * 10.0;
    if !scaled.is_finite() || scaled < 0.0 || scaled > f32::from(u16::MAX) {
        return Err(CodecError::HeightOutOfRange);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millimeters = (scaled + 0.5) as u16;
    Ok(millimeters)
}

/// Converts millimetres to centimetres.
#[must_use]
pub fn millimeters_to_centimeters(millimeters: u16) -> f32 {
    f32::from(millimeters) / 10.0
}

/// Encodes a "travel to height" command.
pub fn encode_move_command(target_height_cm: f32) -> Result<CommandFrame, CodecError> {
    ActuatorCommand::set_height_cm(target_height_cm).map(ActuatorCommand::encode)
}

/// Encodes the "stop" command (`F1 F1 2B 00 2B 7E`).
#[must_use]
pub fn encode_stop_command() -> CommandFrame {
    ActuatorCommand::Stop.encode()
}

/// Encodes a preset endstop command: preset 2 for up, preset 1 for down.
#[must_use]
pub fn encode_endstop_command(direction: Direction) -> CommandFrame {
    ActuatorCommand::Preset(direction).encode()
}

/// Extracts the height (in cm) from a notification frame.
pub fn decode_height_notification(frame: &[u8]) -> Result<f32, CodecError> {
    let len = frame.len();
    if len < HEIGHT_OFFSET_FROM_END {
        return Err(CodecError::FrameTooShort { len });
    }

    let start = len - HEIGHT_OFFSET_FROM_END;
    let millimeters = u16::from_be_bytes([frame[start], frame[start + 1]]);
    Ok(millimeters_to_centimeters(millimeters))
}

/// Builds the notification the control box emits when reporting its height.
///
/// Layout: `F2 F2 01 03 <hh> <ll> 00 <checksum> 7E`.
#[must_use]
pub fn encode_height_notification(millimeters: u16) -> [u8; NOTIFICATION_FRAME_LEN] {
    let [high, low] = millimeters.to_be_bytes();
    let mut frame = [
        NOTIFICATION_PREAMBLE[0],
        NOTIFICATION_PREAMBLE[1],
        OPCODE_HEIGHT_REPORT,
        0x03,
        high,
        low,
        0x00,
        0x00,
        FRAME_TERMINATOR,
    ];
    frame[7] = checksum(&frame[2..7]);
    frame
}

struct RawFrame<'a> {
    opcode: u8,
    payload: &'a [u8],
    checksum: u8,
}

fn raw_command_frame<'i>(input: &mut &'i [u8]) -> ModalResult<RawFrame<'i>> {
    terminated(
        preceded(
            literal(COMMAND_PREAMBLE.as_slice()),
            (
                any,
                length_take(any),
                any,
                any.verify(|byte: &u8| *byte == FRAME_TERMINATOR),
            ),
        ),
        eof,
    )
    .map(|(opcode, payload, checksum, _)| RawFrame {
        opcode,
        payload,
        checksum,
    })
    .parse_next(input)
}

/// Parses a command frame back into an [`ActuatorCommand`].
///
/// Validates the preamble, declared payload length, checksum and terminator.
pub fn parse_command_frame(frame: &[u8]) -> Result<ActuatorCommand, CodecError> {
    let mut input = frame;
    let raw = raw_command_frame(&mut input).map_err(|_| CodecError::Malformed)?;

    // Opcode, length and payload sit directly after the preamble.
    let expected = checksum(&frame[2..4 + raw.payload.len()]);
    if expected != raw.checksum {
        return Err(CodecError::ChecksumMismatch {
            expected,
            found: raw.checksum,
        });
    }

    match (raw.opcode, raw.payload) {
        (OPCODE_SET_HEIGHT, [high, low]) => Ok(ActuatorCommand::SetHeight {
            millimeters: u16::from_be_bytes([*high, *low]),
        }),
        (OPCODE_STOP, []) => Ok(ActuatorCommand::Stop),
        (OPCODE_PRESET_STAND, []) => Ok(ActuatorCommand::Preset(Direction::Up)),
        (OPCODE_PRESET_SIT, []) => Ok(ActuatorCommand::Preset(Direction::Down)),
        (OPCODE_SET_HEIGHT | OPCODE_STOP | OPCODE_PRESET_STAND | OPCODE_PRESET_SIT, _) => {
            Err(CodecError::Malformed)
        }
        (other, _) => Err(CodecError::UnknownOpcode(other)),
    }
}

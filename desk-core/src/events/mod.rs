//! Inbound events consumed by the control loop.
//!
//! Telemetry notifications, platform events and lifecycle notices all travel
//! through one queue as [`ControlEvent`] values and are handled one at a time.

use heapless::{String, Vec};
use winnow::ascii::Caseless;
use winnow::combinator::{alt, empty, eof, preceded, terminated};
use winnow::prelude::*;
use winnow::token::literal;

use crate::link::LinkKind;

/// Capacity of identifiers and user names carried by platform events.
pub const IDENT_CAPACITY: usize = 64;
/// Capacity of free-form cheer messages.
pub const MESSAGE_CAPACITY: usize = 256;
/// Largest notification payload accepted from the actuator.
pub const TELEMETRY_CAPACITY: usize = 20;

pub type Ident = String<IDENT_CAPACITY>;
pub type Message = String<MESSAGE_CAPACITY>;
pub type TelemetryFrame = Vec<u8, TELEMETRY_CAPACITY>;

/// A reward redemption made on the platform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardRedemption {
    pub reward_id: Ident,
    pub redemption_id: Ident,
    pub user_name: Ident,
}

/// A bits cheer, optionally carrying a chat command in its message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cheer {
    pub amount: u32,
    pub message: Message,
    pub user_name: Ident,
}

/// Tagged inbound event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlEvent {
    /// Raw notification from the actuator's "data out" characteristic.
    Telemetry(TelemetryFrame),
    RewardRedeemed(RewardRedemption),
    Cheer(Cheer),
    /// Transport noticed that a link dropped.
    LinkLost(LinkKind),
    /// Process signal or console request to stop.
    Shutdown,
}

impl ControlEvent {
    /// Builds a telemetry event. Frames longer than [`TELEMETRY_CAPACITY`] yield `None`.
    pub fn telemetry(frame: &[u8]) -> Option<Self> {
        Vec::from_slice(frame).ok().map(ControlEvent::Telemetry)
    }
}

/// Commands recognised inside cheer messages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChatCommand {
    /// `!deskstand`
    Stand,
    /// `!desksit`
    Sit,
    /// `!desk`
    Toggle,
}

fn chat_command(input: &mut &str) -> ModalResult<ChatCommand> {
    terminated(
        preceded(
            literal(Caseless("!desk")),
            alt((
                literal(Caseless("stand")).value(ChatCommand::Stand),
                literal(Caseless("sit")).value(ChatCommand::Sit),
                empty.value(ChatCommand::Toggle),
            )),
        ),
        eof,
    )
    .parse_next(input)
}

/// Finds the first whole-word chat command in `message`.
#[must_use]
pub fn parse_chat_command(message: &str) -> Option<ChatCommand> {
    message.split_whitespace().find_map(|word| {
        let mut input = word;
        chat_command(&mut input).ok()
    })
}

/// Copies `value` into a bounded string, truncating at a character boundary.
#[must_use]
pub fn bounded<const N: usize>(value: &str) -> String<N> {
    let mut out = String::new();
    for ch in value.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

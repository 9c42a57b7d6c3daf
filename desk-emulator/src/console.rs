//! Operator console on stdin.
//!
//! Each line is parsed with a small `winnow` grammar and turned into events
//! on the shared channel, or into faults injected straight into the emulated
//! hardware. Closing stdin stops the controller.

use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};

use desk_core::codec::Direction;
use desk_core::events::{Cheer, ControlEvent, RewardRedemption, bounded};
use desk_core::link::LinkKind;
use thiserror::Error;
use tracing::{debug, info};
use winnow::ascii::{dec_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{rest, take_till};

use crate::actuator::DeskMotor;
use crate::display;
use crate::platform::{Catalog, reward_id_for};
use crate::runtime::{EventSender, deliver};

/// Viewer name used when a command omits one.
pub const DEFAULT_USER: &str = "console";

pub const HELP: &str = "\
commands:
  redeem up|down [user]          redeem the desk up/down reward
  cheer <bits> [user] [message]  cheer, e.g. `cheer 500 alice !deskstand`
  fault actuator|display         drop a link
  power on|off                   switch the desk's control box
  status                         show the emulated desk
  help                           this text
  quit                           stop the controller";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConsoleCommand {
    Redeem { direction: Direction, user: String },
    Cheer { amount: u32, user: String, message: String },
    Fault(LinkKind),
    Power(bool),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConsoleError {
    #[error("empty line")]
    Empty,
    #[error("unrecognized command `{0}`, try `help`")]
    Unrecognized(String),
    #[error("no reward titled \"{0}\" is registered")]
    UnknownReward(String),
    #[error("event queue is full")]
    QueueFull,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ConsoleError::Empty);
    }
    terminated(command, (space0, eof))
        .parse(line)
        .map_err(|_| ConsoleError::Unrecognized(line.to_owned()))
}

fn command(input: &mut &str) -> ModalResult<ConsoleCommand> {
    alt((
        redeem,
        cheer,
        fault,
        power,
        "status".value(ConsoleCommand::Status),
        "help".value(ConsoleCommand::Help),
        alt(("quit", "exit")).value(ConsoleCommand::Quit),
    ))
    .parse_next(input)
}

fn word<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    preceded(space1, take_till(1.., |c: char| c.is_whitespace())).parse_next(input)
}

/// Optional viewer name. A leading `!` starts the message instead.
fn user(input: &mut &str) -> ModalResult<String> {
    opt(word.verify(|name: &str| !name.starts_with('!')))
        .map(|user| user.unwrap_or(DEFAULT_USER).to_owned())
        .parse_next(input)
}

fn redeem(input: &mut &str) -> ModalResult<ConsoleCommand> {
    let direction = preceded(
        ("redeem", space1),
        alt(("up".value(Direction::Up), "down".value(Direction::Down))),
    )
    .parse_next(input)?;
    let user = user(input)?;
    Ok(ConsoleCommand::Redeem { direction, user })
}

fn cheer(input: &mut &str) -> ModalResult<ConsoleCommand> {
    let amount: u32 = preceded(("cheer", space1), dec_uint).parse_next(input)?;
    let user = user(input)?;
    let message = rest.parse_next(input)?;
    Ok(ConsoleCommand::Cheer {
        amount,
        user,
        message: message.trim().to_owned(),
    })
}

fn fault(input: &mut &str) -> ModalResult<ConsoleCommand> {
    preceded(
        ("fault", space1),
        alt((
            "actuator".value(LinkKind::Actuator),
            "desk".value(LinkKind::Actuator),
            "display".value(LinkKind::Display),
        )),
    )
    .map(ConsoleCommand::Fault)
    .parse_next(input)
}

fn power(input: &mut &str) -> ModalResult<ConsoleCommand> {
    preceded(("power", space1), alt(("on".value(true), "off".value(false))))
        .map(ConsoleCommand::Power)
        .parse_next(input)
}

/// What the input loop should do after a command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Done,
    Say(String),
    Quit,
}

pub struct Console<'a> {
    events: EventSender<'a>,
    motor: &'a DeskMotor,
    catalog: &'a Catalog,
    raise_title: String,
    lower_title: String,
    redemptions: u32,
}

impl<'a> Console<'a> {
    pub fn new(
        events: EventSender<'a>,
        motor: &'a DeskMotor,
        catalog: &'a Catalog,
        raise_title: &str,
        lower_title: &str,
    ) -> Self {
        Self {
            events,
            motor,
            catalog,
            raise_title: raise_title.to_owned(),
            lower_title: lower_title.to_owned(),
            redemptions: 0,
        }
    }

    fn send(&self, event: ControlEvent) -> Result<(), ConsoleError> {
        self.events.try_send(event).map_err(|_| ConsoleError::QueueFull)
    }

    pub fn dispatch(&mut self, command: ConsoleCommand) -> Result<Reply, ConsoleError> {
        match command {
            ConsoleCommand::Redeem { direction, user } => {
                let title = match direction {
                    Direction::Up => &self.raise_title,
                    Direction::Down => &self.lower_title,
                };
                let reward_id = reward_id_for(self.catalog, title)
                    .ok_or_else(|| ConsoleError::UnknownReward(title.clone()))?;
                self.redemptions += 1;
                self.send(ControlEvent::RewardRedeemed(RewardRedemption {
                    reward_id,
                    redemption_id: bounded(&format!("console-{}", self.redemptions)),
                    user_name: bounded(&user),
                }))?;
            }
            ConsoleCommand::Cheer {
                amount,
                user,
                message,
            } => self.send(ControlEvent::Cheer(Cheer {
                amount,
                message: bounded(&message),
                user_name: bounded(&user),
            }))?,
            ConsoleCommand::Fault(LinkKind::Actuator) => {
                self.motor.inject_fault();
                self.send(ControlEvent::LinkLost(LinkKind::Actuator))?;
            }
            // Surfaces on the next publish.
            ConsoleCommand::Fault(LinkKind::Display) => display::inject_fault(),
            ConsoleCommand::Power(on) => {
                self.motor.set_powered(on);
                if !on {
                    self.send(ControlEvent::LinkLost(LinkKind::Actuator))?;
                }
            }
            ConsoleCommand::Status => return Ok(Reply::Say(self.status())),
            ConsoleCommand::Help => return Ok(Reply::Say(HELP.to_owned())),
            ConsoleCommand::Quit => {
                deliver(&self.events, ControlEvent::Shutdown);
                return Ok(Reply::Quit);
            }
        }
        Ok(Reply::Done)
    }

    fn status(&self) -> String {
        let motor = self.motor.snapshot();
        let target = motor.target_mm.map_or_else(
            || "-".to_owned(),
            |mm| format!("{:.1} cm", f32::from(mm) / 10.0),
        );
        format!(
            "height {:.1} cm, target {target}, power {}, link {}, notifications {}",
            f32::from(motor.height_mm) / 10.0,
            if motor.powered { "on" } else { "off" },
            if motor.connected { "up" } else { "down" },
            if motor.notifying { "on" } else { "off" },
        )
    }

    /// Reads commands until `quit` or end of input.
    pub fn run<R: BufRead>(mut self, input: R) {
        for line in input.lines() {
            let Ok(line) = line else { break };
            let reply = parse_command(&line).and_then(|command| {
                debug!(?command, "console command");
                self.dispatch(command)
            });
            match reply {
                Ok(Reply::Done) | Err(ConsoleError::Empty) => {}
                Ok(Reply::Say(text)) => println!("{text}"),
                Ok(Reply::Quit) => return,
                Err(err) => println!("{err}"),
            }
        }

        info!("console input closed");
        deliver(&self.events, ControlEvent::Shutdown);
    }
}

/// Runs the console on its own thread, reading stdin.
pub fn spawn(console: Console<'static>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".to_owned())
        .spawn(move || console.run(io::stdin().lock()))
}

//! Turns inbound desk requests into actuator frames and ledger updates.
//!
//! Each request becomes one [`PendingAction`]. The reconciler decides whether
//! the desk should move ([`Reconciler::plan`]), sends stop followed by the move
//! frame with a settle pause in between ([`Reconciler::transmit`]), applies the
//! result to the movement state ([`Reconciler::settle`]) and finally reports
//! redemptions as fulfilled or canceled ([`Reconciler::report`]).
//!
//! A failed transmit is never retried inline: the actuator link is flagged for
//! the next tick and the requester gets their points back.

use core::fmt;
use core::time::Duration;

use log::{error, info, warn};

use crate::catalog::{DeskRewards, PlatformError};
use crate::codec::{self, CodecError, CommandFrame, Direction};
use crate::config::{ActuatorMode, ControllerConfig};
use crate::events::{Cheer, ChatCommand, Ident, RewardRedemption, parse_chat_command};
use crate::link::{Delay, LinkControl, LinkError, LinkKind, LinkSupervisor};
use crate::tracker::{DeskState, MovementTracker};

/// Pause between the stop frame and the move frame.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Write side of the actuator link.
#[allow(async_fn_in_trait)]
pub trait ActuatorLink: LinkControl {
    /// Writes one frame to the "data in" characteristic.
    async fn write(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Enables height notifications on the "data out" characteristic.
    async fn subscribe(&mut self) -> Result<(), LinkError>;
}

/// Final status of a redemption as reported back to the platform.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RedemptionStatus {
    Fulfilled,
    /// Points are refunded to the viewer.
    Canceled,
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedemptionStatus::Fulfilled => f.write_str("FULFILLED"),
            RedemptionStatus::Canceled => f.write_str("CANCELED"),
        }
    }
}

/// Platform callback for redemption outcomes.
#[allow(async_fn_in_trait)]
pub trait RedemptionLedger {
    async fn set_redemption_status(
        &mut self,
        reward_id: &str,
        redemption_id: &str,
        status: RedemptionStatus,
    ) -> Result<(), PlatformError>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ActionKind {
    RaiseDesk,
    LowerDesk,
    /// Raise when down, lower when up.
    ToggleDesk,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::RaiseDesk => f.write_str("raise"),
            ActionKind::LowerDesk => f.write_str("lower"),
            ActionKind::ToggleDesk => f.write_str("toggle"),
        }
    }
}

impl From<ChatCommand> for ActionKind {
    fn from(command: ChatCommand) -> Self {
        match command {
            ChatCommand::Stand => ActionKind::RaiseDesk,
            ChatCommand::Sit => ActionKind::LowerDesk,
            ChatCommand::Toggle => ActionKind::ToggleDesk,
        }
    }
}

/// Where a pending action came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActionSource {
    /// Channel point redemption; acknowledged through the ledger.
    Redemption { reward_id: Ident, redemption_id: Ident },
    Cheer { amount: u32 },
    /// Baseline move issued by the controller itself.
    Startup,
}

/// One desk request, consumed once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub source: ActionSource,
    pub requester: Ident,
}

impl PendingAction {
    /// Builds an action for a redemption of one of the desk rewards.
    #[must_use]
    pub fn from_redemption(redemption: &RewardRedemption, rewards: &DeskRewards) -> Option<Self> {
        let kind = rewards.kind_for(redemption.reward_id.as_str())?;
        Some(Self {
            kind,
            source: ActionSource::Redemption {
                reward_id: redemption.reward_id.clone(),
                redemption_id: redemption.redemption_id.clone(),
            },
            requester: redemption.user_name.clone(),
        })
    }

    /// Builds an action for a cheer of at least `min_bits` carrying a chat command.
    #[must_use]
    pub fn from_cheer(cheer: &Cheer, min_bits: u32) -> Option<Self> {
        if cheer.amount < min_bits {
            return None;
        }
        let command = parse_chat_command(cheer.message.as_str())?;
        Some(Self {
            kind: command.into(),
            source: ActionSource::Cheer {
                amount: cheer.amount,
            },
            requester: cheer.user_name.clone(),
        })
    }

    /// Lowers the desk to its sitting baseline at startup.
    #[must_use]
    pub fn startup_baseline() -> Self {
        Self {
            kind: ActionKind::LowerDesk,
            source: ActionSource::Startup,
            requester: Ident::new(),
        }
    }
}

/// Why a request was refunded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// Telemetry shows the desk already at, or heading to, the target.
    AlreadyThere(DeskState),
    /// Target height could not be encoded.
    Encode(CodecError),
    TransmitFailed(LinkError),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::AlreadyThere(state) => write!(f, "desk is already {state}"),
            CancelReason::Encode(err) => write!(f, "could not encode move: {err}"),
            CancelReason::TransmitFailed(err) => write!(f, "transmit failed: {err}"),
        }
    }
}

/// Frames to send for one move and the state to assume once they are out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MovePlan {
    pub direction: Direction,
    /// Stop frame followed by the move frame.
    pub frames: [CommandFrame; 2],
}

impl MovePlan {
    #[must_use]
    pub const fn resulting_state(&self) -> DeskState {
        match self.direction {
            Direction::Up => DeskState::GoingUp,
            Direction::Down => DeskState::GoingDown,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Move(MovePlan),
    Refuse(CancelReason),
    /// Nothing to do and nothing to acknowledge.
    NoAction,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Fulfilled(Direction),
    Canceled(CancelReason),
    Ignored,
}

impl Outcome {
    /// Ledger status for this outcome, if one should be reported.
    #[must_use]
    pub const fn status(&self) -> Option<RedemptionStatus> {
        match self {
            Outcome::Fulfilled(_) => Some(RedemptionStatus::Fulfilled),
            Outcome::Canceled(_) => Some(RedemptionStatus::Canceled),
            Outcome::Ignored => None,
        }
    }
}

/// Stateless decision and reporting logic over a shared configuration.
#[derive(Copy, Clone, Debug)]
pub struct Reconciler<'a> {
    config: &'a ControllerConfig,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub const fn new(config: &'a ControllerConfig) -> Self {
        Self { config }
    }

    /// Decides what to do with `action` given the current desk state.
    ///
    /// The "already there" short-circuit only applies when telemetry is enabled
    /// and never to the startup baseline.
    #[must_use]
    pub fn plan(&self, action: &PendingAction, state: DeskState) -> Decision {
        let direction = match action.kind {
            ActionKind::RaiseDesk => Direction::Up,
            ActionKind::LowerDesk => Direction::Down,
            ActionKind::ToggleDesk => match state {
                DeskState::Sitting | DeskState::GoingDown => Direction::Up,
                DeskState::Standing | DeskState::GoingUp => Direction::Down,
                DeskState::Stopped => return Decision::NoAction,
            },
        };

        let enforce = self.config.features.telemetry && action.source != ActionSource::Startup;
        let already_there = match direction {
            Direction::Up => state.is_raised_or_rising(),
            Direction::Down => state.is_lowered_or_falling(),
        };
        if enforce && already_there {
            return Decision::Refuse(CancelReason::AlreadyThere(state));
        }

        match self.move_frame(direction) {
            Ok(frame) => Decision::Move(MovePlan {
                direction,
                frames: [codec::encode_stop_command(), frame],
            }),
            Err(err) => Decision::Refuse(CancelReason::Encode(err)),
        }
    }

    fn move_frame(&self, direction: Direction) -> Result<CommandFrame, CodecError> {
        match self.config.mode {
            ActuatorMode::Preset => Ok(codec::encode_endstop_command(direction)),
            ActuatorMode::TargetHeight => {
                let geometry = &self.config.geometry;
                let target = match direction {
                    Direction::Up => geometry.standing_cm(),
                    Direction::Down => geometry.sitting_cm(),
                };
                codec::encode_move_command(target)
            }
        }
    }

    /// Sends stop, waits [`SETTLE_DELAY`], then sends the move frame.
    pub async fn transmit<A, D>(
        &self,
        plan: &MovePlan,
        actuator: &mut A,
        delay: &mut D,
    ) -> Result<(), LinkError>
    where
        A: ActuatorLink,
        D: Delay,
    {
        let [stop, movement] = &plan.frames;
        actuator.write(stop).await?;
        delay.sleep(SETTLE_DELAY).await;
        actuator.write(movement).await
    }

    /// Applies a transmit result: optimistic state on success, reconnect flag
    /// and unchanged state on failure.
    pub fn settle(
        &self,
        action: &PendingAction,
        plan: &MovePlan,
        result: Result<(), LinkError>,
        tracker: &mut MovementTracker<'_>,
        links: &mut LinkSupervisor,
    ) -> Outcome {
        match result {
            Ok(()) => {
                tracker.force(plan.resulting_state());
                info!(
                    "moving desk {} for {} (now {})",
                    plan.direction,
                    requester(action),
                    tracker.state()
                );
                Outcome::Fulfilled(plan.direction)
            }
            Err(err) => {
                error!(
                    "could not move desk {} for {}: {err} (state {})",
                    plan.direction,
                    requester(action),
                    tracker.state()
                );
                links.mark_failed(LinkKind::Actuator);
                Outcome::Canceled(CancelReason::TransmitFailed(err))
            }
        }
    }

    /// Reports the outcome of a redemption. Cheers and startup moves have
    /// nothing to acknowledge.
    pub async fn report<L>(&self, action: &PendingAction, outcome: &Outcome, ledger: &mut L)
    where
        L: RedemptionLedger,
    {
        let ActionSource::Redemption {
            reward_id,
            redemption_id,
        } = &action.source
        else {
            return;
        };
        let Some(status) = outcome.status() else {
            return;
        };

        if let Outcome::Canceled(reason) = outcome {
            warn!("refunding {} ({}): {reason}", requester(action), action.kind);
        }
        if let Err(err) = ledger
            .set_redemption_status(reward_id.as_str(), redemption_id.as_str(), status)
            .await
        {
            error!(
                "could not mark redemption {redemption_id} {status} for {}: {err}",
                requester(action)
            );
        }
    }

    /// Logs a refused request; the caller still reports the outcome.
    pub fn refuse(&self, action: &PendingAction, reason: CancelReason) -> Outcome {
        info!("{} requested {} but {reason}", requester(action), action.kind);
        Outcome::Canceled(reason)
    }

    pub fn ignore(&self, action: &PendingAction, state: DeskState) -> Outcome {
        info!(
            "{} requested {} while desk is {state}; nothing to do",
            requester(action),
            action.kind
        );
        Outcome::Ignored
    }

    /// Plans, transmits, settles and reports one action in sequence.
    pub async fn reconcile<A, D, L>(
        &self,
        action: &PendingAction,
        tracker: &mut MovementTracker<'_>,
        links: &mut LinkSupervisor,
        actuator: &mut A,
        delay: &mut D,
        ledger: &mut L,
    ) -> Outcome
    where
        A: ActuatorLink,
        D: Delay,
        L: RedemptionLedger,
    {
        let outcome = match self.plan(action, tracker.state()) {
            Decision::Move(plan) => {
                let result = self.transmit(&plan, actuator, delay).await;
                self.settle(action, &plan, result, tracker, links)
            }
            Decision::Refuse(reason) => self.refuse(action, reason),
            Decision::NoAction => self.ignore(action, tracker.state()),
        };

        self.report(action, &outcome, ledger).await;
        outcome
    }
}

fn requester(action: &PendingAction) -> &str {
    if action.requester.is_empty() {
        "controller"
    } else {
        action.requester.as_str()
    }
}

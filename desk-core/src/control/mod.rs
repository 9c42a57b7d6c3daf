//! Control loop tying links, events and the reconciler together.
//!
//! One cooperative task owns both links, the event subscription and the tick
//! timer. Startup connects the display and the actuator, moves the desk to its
//! sitting baseline and registers with the platform. After that the loop
//! consumes one inbound event at a time and, once per [`TICK_INTERVAL`],
//! publishes the height and services pending reconnects.
//!
//! While a move is being transmitted, telemetry keeps flowing into the tracker
//! and every other event is parked in a backlog that is drained, in arrival
//! order, before new events are read.

use core::convert::Infallible;
use core::fmt::{self, Write as _};
use core::time::Duration;

use embassy_futures::select::{Either, select};
use heapless::{Deque, String};
use log::{debug, error, info, warn};

use crate::catalog::{DeskRewards, PlatformError, RewardCatalog, ensure_desk_rewards};
use crate::config::{ConfigError, ControllerConfig};
use crate::events::{Cheer, ControlEvent, RewardRedemption};
use crate::link::{Delay, LinkControl, LinkError, LinkKind, LinkSupervisor};
use crate::reconcile::{
    ActuatorLink, Decision, Outcome, PendingAction, Reconciler, RedemptionLedger,
};
use crate::tracker::MovementTracker;

/// Period of the publish/reconnect tick.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Events that can be parked while a move is in flight.
pub const BACKLOG_CAPACITY: usize = 16;

/// Periodic tick plus the settle delays used by links and moves.
#[allow(async_fn_in_trait)]
pub trait Timebase: Delay {
    /// Waits one [`TICK_INTERVAL`]. Ticks missed while the loop was busy are
    /// not made up.
    async fn next_tick(&mut self);
}

/// Message pushed to the display server.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HeightUpdate {
    pub height_cm: f32,
}

impl HeightUpdate {
    pub const EVENT: &'static str = "height_update";

    /// Height rendered with one decimal, e.g. `"75.3"`.
    #[must_use]
    pub fn payload(&self) -> String<16> {
        let mut payload = String::new();
        // 16 bytes hold any height the codec can represent.
        let _ = write!(payload, "{:.1}", self.height_cm);
        payload
    }
}

/// Outbound side of the display link.
#[allow(async_fn_in_trait)]
pub trait DisplayLink: LinkControl {
    async fn publish(&mut self, update: &HeightUpdate) -> Result<(), LinkError>;
}

/// Platform session delivering inbound events.
///
/// `next_event` is raced against timers and dropped when they win, so it
/// must not lose an event when cancelled.
#[allow(async_fn_in_trait)]
pub trait EventSource {
    async fn subscribe(&mut self, scopes: &[&'static str]) -> Result<(), PlatformError>;

    async fn next_event(&mut self) -> ControlEvent;

    async fn unsubscribe(&mut self);

    /// Ends the platform session.
    async fn close(&mut self);
}

/// Conditions that abort the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FatalError {
    Config(ConfigError),
    DisplayConnect(LinkError),
    ActuatorConnect(LinkError),
    TelemetrySubscribe(LinkError),
    /// Reward catalog could not be reconciled.
    Registration(PlatformError),
    Subscription(PlatformError),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::Config(err) => write!(f, "invalid configuration: {err}"),
            FatalError::DisplayConnect(err) => write!(f, "could not connect to display: {err}"),
            FatalError::ActuatorConnect(err) => write!(f, "could not connect to desk: {err}"),
            FatalError::TelemetrySubscribe(err) => {
                write!(f, "could not subscribe to height notifications: {err}")
            }
            FatalError::Registration(err) => write!(f, "could not set up rewards: {err}"),
            FatalError::Subscription(err) => write!(f, "could not subscribe to events: {err}"),
        }
    }
}

/// Whether the loop keeps going after an event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// The desk controller.
pub struct ControlLoop<'a, A, D, P, T> {
    config: &'a ControllerConfig,
    actuator: A,
    display: D,
    platform: P,
    timebase: T,
    tracker: MovementTracker<'a>,
    links: LinkSupervisor,
    reconciler: Reconciler<'a>,
    rewards: Option<DeskRewards>,
    backlog: Deque<ControlEvent, BACKLOG_CAPACITY>,
}

impl<'a, A, D, P, T> ControlLoop<'a, A, D, P, T>
where
    A: ActuatorLink,
    D: DisplayLink,
    P: EventSource + RedemptionLedger + RewardCatalog,
    T: Timebase,
{
    pub fn new(
        config: &'a ControllerConfig,
        actuator: A,
        display: D,
        platform: P,
        timebase: T,
    ) -> Self {
        Self {
            config,
            actuator,
            display,
            platform,
            timebase,
            tracker: MovementTracker::new(&config.geometry),
            links: LinkSupervisor::new(),
            reconciler: Reconciler::new(config),
            rewards: None,
            backlog: Deque::new(),
        }
    }

    /// Starts up, then runs until a shutdown event arrives.
    pub async fn run(&mut self) -> Result<(), FatalError> {
        self.startup().await?;
        while self.step().await == Flow::Continue {}
        self.shutdown().await;
        Ok(())
    }

    /// Brings up links and the platform session.
    ///
    /// A failed baseline move is not fatal; it leaves the actuator flagged for
    /// reconnection like any other transmit failure.
    pub async fn startup(&mut self) -> Result<(), FatalError> {
        let features = self.config.features;
        let scopes = self.config.required_scopes().map_err(FatalError::Config)?;

        if features.display {
            self.display
                .connect()
                .await
                .map_err(FatalError::DisplayConnect)?;
            self.links.mark_connected(LinkKind::Display);
            info!("connected to display");
        }

        self.actuator
            .connect()
            .await
            .map_err(FatalError::ActuatorConnect)?;
        self.links.mark_connected(LinkKind::Actuator);
        if features.telemetry {
            self.actuator
                .subscribe()
                .await
                .map_err(FatalError::TelemetrySubscribe)?;
        }
        info!("connected to desk {}", self.config.actuator.address);

        self.execute(&PendingAction::startup_baseline()).await;

        if features.channel_points {
            let settings = self
                .config
                .rewards
                .as_ref()
                .ok_or(FatalError::Config(ConfigError::MissingRewardTitle))?;
            let rewards = ensure_desk_rewards(&mut self.platform, settings)
                .await
                .map_err(FatalError::Registration)?;
            info!("desk rewards ready (raise {}, lower {})", rewards.raise, rewards.lower);
            self.rewards = Some(rewards);
        }

        self.platform
            .subscribe(&scopes)
            .await
            .map_err(FatalError::Subscription)?;
        info!("listening for desk requests");
        Ok(())
    }

    /// Handles one backlog entry, inbound event or tick.
    pub async fn step(&mut self) -> Flow {
        if let Some(event) = self.backlog.pop_front() {
            return self.handle_event(event).await;
        }

        match select(self.platform.next_event(), self.timebase.next_tick()).await {
            Either::First(event) => self.handle_event(event).await,
            Either::Second(()) => {
                self.tick().await;
                Flow::Continue
            }
        }
    }

    pub async fn handle_event(&mut self, event: ControlEvent) -> Flow {
        match event {
            ControlEvent::Telemetry(frame) => {
                if self.config.features.telemetry {
                    observe(&mut self.tracker, &frame);
                }
            }
            ControlEvent::RewardRedeemed(redemption) => self.on_redemption(&redemption).await,
            ControlEvent::Cheer(cheer) => self.on_cheer(&cheer).await,
            ControlEvent::LinkLost(kind) => self.links.mark_failed(kind),
            ControlEvent::Shutdown => return Flow::Shutdown,
        }
        Flow::Continue
    }

    async fn on_redemption(&mut self, redemption: &RewardRedemption) {
        if !self.config.features.channel_points {
            warn!("dropping redemption from {}: channel points disabled", redemption.user_name);
            return;
        }
        let action = self
            .rewards
            .as_ref()
            .and_then(|rewards| PendingAction::from_redemption(redemption, rewards));
        match action {
            Some(action) => {
                self.execute(&action).await;
            }
            None => debug!("ignoring redemption of reward {}", redemption.reward_id),
        }
    }

    async fn on_cheer(&mut self, cheer: &Cheer) {
        if !self.config.features.bits {
            debug!("ignoring cheer from {}: bits disabled", cheer.user_name);
            return;
        }
        match PendingAction::from_cheer(cheer, self.config.min_bits) {
            Some(action) => {
                self.execute(&action).await;
            }
            None => debug!(
                "ignoring cheer of {} bits from {}",
                cheer.amount, cheer.user_name
            ),
        }
    }

    /// Runs one action end to end while keeping telemetry flowing.
    pub async fn execute(&mut self, action: &PendingAction) -> Outcome {
        let reconciler = self.reconciler;
        let outcome = match reconciler.plan(action, self.tracker.state()) {
            Decision::Move(plan) => {
                let transmit = reconciler.transmit(&plan, &mut self.actuator, &mut self.timebase);
                let drain = drain_while_moving(
                    &mut self.platform,
                    &mut self.tracker,
                    &mut self.backlog,
                    self.config.features.telemetry,
                );
                let result = match select(transmit, drain).await {
                    Either::First(result) => result,
                    Either::Second(never) => match never {},
                };
                reconciler.settle(action, &plan, result, &mut self.tracker, &mut self.links)
            }
            Decision::Refuse(reason) => reconciler.refuse(action, reason),
            Decision::NoAction => reconciler.ignore(action, self.tracker.state()),
        };

        reconciler.report(action, &outcome, &mut self.platform).await;
        outcome
    }

    /// Publishes the height and services pending reconnects.
    pub async fn tick(&mut self) {
        self.publish_height().await;

        self.links
            .service(LinkKind::Actuator, &mut self.actuator, &mut self.timebase)
            .await;
        self.links
            .service(LinkKind::Display, &mut self.display, &mut self.timebase)
            .await;
    }

    // Skipped until the first height sample arrives.
    async fn publish_height(&mut self) {
        if !self.config.features.display || !self.links.is_connected(LinkKind::Display) {
            return;
        }
        let Some(height_cm) = self.tracker.height_cm() else {
            return;
        };

        if let Err(err) = self.display.publish(&HeightUpdate { height_cm }).await {
            warn!("could not publish height: {err}");
            self.links.mark_failed(LinkKind::Display);
        }
    }

    /// Ends the platform session and closes both links.
    pub async fn shutdown(&mut self) {
        info!("shutting down");
        self.platform.unsubscribe().await;
        self.platform.close().await;

        if self.config.features.display {
            if let Err(err) = self.display.disconnect().await {
                warn!("display disconnect failed: {err}");
            }
            self.links.mark_disconnected(LinkKind::Display);
        }
        if let Err(err) = self.actuator.disconnect().await {
            warn!("desk disconnect failed: {err}");
        }
        self.links.mark_disconnected(LinkKind::Actuator);
    }

    #[must_use]
    pub const fn tracker(&self) -> &MovementTracker<'a> {
        &self.tracker
    }

    #[must_use]
    pub const fn links(&self) -> &LinkSupervisor {
        &self.links
    }

    #[must_use]
    pub const fn rewards(&self) -> Option<&DeskRewards> {
        self.rewards.as_ref()
    }

    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    #[must_use]
    pub const fn actuator(&self) -> &A {
        &self.actuator
    }

    #[must_use]
    pub const fn display(&self) -> &D {
        &self.display
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub const fn timebase(&self) -> &T {
        &self.timebase
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }
}

fn observe(tracker: &mut MovementTracker<'_>, frame: &[u8]) {
    if let Err(err) = tracker.observe_frame(frame) {
        warn!("dropping height notification: {err}");
    }
}

/// Feeds telemetry to the tracker and parks everything else until the
/// in-flight move completes. Never returns.
async fn drain_while_moving<P>(
    platform: &mut P,
    tracker: &mut MovementTracker<'_>,
    backlog: &mut Deque<ControlEvent, BACKLOG_CAPACITY>,
    telemetry: bool,
) -> Infallible
where
    P: EventSource,
{
    loop {
        match platform.next_event().await {
            ControlEvent::Telemetry(frame) => {
                if telemetry {
                    observe(tracker, &frame);
                }
            }
            event => {
                if let Err(event) = backlog.push_back(event) {
                    error!("event backlog full; dropping {event:?}");
                }
            }
        }
    }
}

#![allow(dead_code)]

use core::future::{Future, pending};
use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use std::collections::VecDeque;

use desk_core::catalog::{
    DEFAULT_REWARD_COST, PlatformError, PlatformErrorKind, Reward, RewardCatalog, RewardList,
};
use desk_core::codec::{self, ActuatorCommand};
use desk_core::config::{
    ActuatorEndpoint, ActuatorMode, ActuatorProfile, ControllerConfig, DisplayEndpoint,
    FeatureFlags, MacAddress, RewardSettings,
};
use desk_core::control::{DisplayLink, EventSource, HeightUpdate, Timebase};
use desk_core::events::{Cheer, ControlEvent, RewardRedemption, bounded};
use desk_core::link::{Delay, LinkControl, LinkError, LinkErrorKind, LinkKind};
use desk_core::reconcile::{ActuatorLink, RedemptionLedger, RedemptionStatus};
use desk_core::tracker::DeskGeometry;

pub fn config(telemetry: bool) -> ControllerConfig {
    ControllerConfig {
        geometry: DeskGeometry::new(75.0, 120.0).expect("geometry"),
        actuator: ActuatorEndpoint::from_profile(
            "C4:BE:84:00:11:22".parse::<MacAddress>().expect("mac"),
            ActuatorProfile::Omnidesk,
        )
        .expect("endpoint"),
        mode: ActuatorMode::TargetHeight,
        display: Some(DisplayEndpoint::new("127.0.0.1:5678").expect("address")),
        features: FeatureFlags {
            telemetry,
            bits: true,
            channel_points: true,
            display: true,
        },
        rewards: Some(RewardSettings::new("Desk Up", "Desk Down").expect("titles")),
        min_bits: 100,
    }
}

pub fn redemption(reward_id: &str, redemption_id: &str, user: &str) -> ControlEvent {
    ControlEvent::RewardRedeemed(RewardRedemption {
        reward_id: bounded(reward_id),
        redemption_id: bounded(redemption_id),
        user_name: bounded(user),
    })
}

pub fn cheer(amount: u32, message: &str, user: &str) -> ControlEvent {
    ControlEvent::Cheer(Cheer {
        amount,
        message: bounded(message),
        user_name: bounded(user),
    })
}

pub fn height_event(height_cm: f32) -> ControlEvent {
    let millimeters = codec::centimeters_to_millimeters(height_cm).expect("encodable");
    ControlEvent::telemetry(&codec::encode_height_notification(millimeters)).expect("fits")
}

fn link_error(link: LinkKind) -> LinkError {
    LinkError::new(link, LinkErrorKind::Io)
}

/// Actuator that records every call and decodes written frames.
#[derive(Default)]
pub struct MockActuator {
    pub calls: Vec<&'static str>,
    pub frames: Vec<Vec<u8>>,
    pub fail_connect: bool,
    pub fail_subscribe: bool,
    /// Number of upcoming writes that fail.
    pub failing_writes: usize,
    /// Number of upcoming connects that fail after the first success.
    pub failing_reconnects: usize,
    pub connected: bool,
}

impl MockActuator {
    pub fn commands(&self) -> Vec<ActuatorCommand> {
        self.frames
            .iter()
            .map(|frame| codec::parse_command_frame(frame).expect("well-formed frame"))
            .collect()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|entry| **entry == call).count()
    }
}

impl LinkControl for MockActuator {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.calls.push("connect");
        if self.fail_connect {
            return Err(link_error(LinkKind::Actuator));
        }
        if self.failing_reconnects > 0 && self.count("connect") > 1 {
            self.failing_reconnects -= 1;
            return Err(link_error(LinkKind::Actuator));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.calls.push("disconnect");
        self.connected = false;
        Ok(())
    }

    async fn restore_subscriptions(&mut self) -> Result<(), LinkError> {
        self.calls.push("restore");
        Ok(())
    }
}

impl ActuatorLink for MockActuator {
    async fn write(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        self.calls.push("write");
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(link_error(LinkKind::Actuator));
        }
        self.frames.push(frame.to_vec());
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<(), LinkError> {
        self.calls.push("subscribe");
        if self.fail_subscribe {
            return Err(link_error(LinkKind::Actuator));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDisplay {
    pub published: Vec<String>,
    pub connects: usize,
    pub disconnects: usize,
    pub fail_connect: bool,
    pub failing_publishes: usize,
}

impl LinkControl for MockDisplay {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.connects += 1;
        if self.fail_connect {
            return Err(link_error(LinkKind::Display));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.disconnects += 1;
        Ok(())
    }
}

impl DisplayLink for MockDisplay {
    async fn publish(&mut self, update: &HeightUpdate) -> Result<(), LinkError> {
        if self.failing_publishes > 0 {
            self.failing_publishes -= 1;
            return Err(link_error(LinkKind::Display));
        }
        self.published.push(String::from(update.payload().as_str()));
        Ok(())
    }
}

/// Platform with a scripted event queue. `next_event` stays pending once the
/// queue is empty.
#[derive(Default)]
pub struct MockPlatform {
    pub events: VecDeque<ControlEvent>,
    pub statuses: Vec<(String, String, RedemptionStatus)>,
    pub rewards: RewardList,
    pub created: Vec<String>,
    pub scopes: Vec<&'static str>,
    pub unauthorized: bool,
    pub fail_subscribe: bool,
    pub unsubscribed: bool,
    pub closed: bool,
}

impl MockPlatform {
    pub fn with_events(events: impl IntoIterator<Item = ControlEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn status_of(&self, redemption_id: &str) -> Option<RedemptionStatus> {
        self.statuses
            .iter()
            .find(|(_, id, _)| id == redemption_id)
            .map(|(_, _, status)| *status)
    }
}

impl EventSource for MockPlatform {
    async fn subscribe(&mut self, scopes: &[&'static str]) -> Result<(), PlatformError> {
        if self.fail_subscribe {
            return Err(PlatformError::new(PlatformErrorKind::Unavailable));
        }
        self.scopes.extend_from_slice(scopes);
        Ok(())
    }

    async fn next_event(&mut self) -> ControlEvent {
        match self.events.pop_front() {
            Some(event) => event,
            None => pending().await,
        }
    }

    async fn unsubscribe(&mut self) {
        self.unsubscribed = true;
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

impl RedemptionLedger for MockPlatform {
    async fn set_redemption_status(
        &mut self,
        reward_id: &str,
        redemption_id: &str,
        status: RedemptionStatus,
    ) -> Result<(), PlatformError> {
        self.statuses
            .push((reward_id.to_string(), redemption_id.to_string(), status));
        Ok(())
    }
}

impl RewardCatalog for MockPlatform {
    async fn list_rewards(&mut self) -> Result<RewardList, PlatformError> {
        if self.unauthorized {
            return Err(PlatformError::new(PlatformErrorKind::Unauthorized));
        }
        Ok(self.rewards.clone())
    }

    async fn create_reward(&mut self, title: &str, cost: u32) -> Result<Reward, PlatformError> {
        let reward = Reward {
            id: bounded(&format!("id-{title}")),
            title: bounded(title),
            cost,
        };
        self.created.push(title.to_string());
        self.rewards
            .push(reward.clone())
            .map_err(|_| PlatformError::new(PlatformErrorKind::Rejected))?;
        Ok(reward)
    }
}

pub fn existing_reward(id: &str, title: &str) -> Reward {
    Reward {
        id: bounded(id),
        title: bounded(title),
        cost: DEFAULT_REWARD_COST,
    }
}

/// Completes on the second poll, letting sibling futures in a `select` run.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Timebase whose delays and ticks complete without waiting.
#[derive(Default)]
pub struct MockTimebase {
    pub sleeps: Vec<Duration>,
    pub ticks: usize,
    /// Yield once inside every sleep so concurrent futures get polled.
    pub yielding: bool,
}

impl MockTimebase {
    pub fn yielding() -> Self {
        Self {
            yielding: true,
            ..Self::default()
        }
    }
}

impl Delay for MockTimebase {
    async fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
        if self.yielding {
            YieldOnce(false).await;
        }
    }
}

impl Timebase for MockTimebase {
    async fn next_tick(&mut self) {
        self.ticks += 1;
    }
}

mod common;

use common::{MockActuator, MockPlatform, MockTimebase, config};
use desk_core::codec::{ActuatorCommand, Direction, encode_move_command, encode_stop_command};
use desk_core::events::bounded;
use desk_core::link::LinkSupervisor;
use desk_core::reconcile::{
    ActionKind, ActionSource, CancelReason, Outcome, PendingAction, Reconciler, RedemptionStatus,
    SETTLE_DELAY,
};
use desk_core::tracker::{DeskState, MovementTracker};
use embassy_futures::block_on;

fn redeem(kind: ActionKind) -> PendingAction {
    PendingAction {
        kind,
        source: ActionSource::Redemption {
            reward_id: bounded("reward"),
            redemption_id: bounded("r-1"),
        },
        requester: bounded("viewer"),
    }
}

struct Harness {
    actuator: MockActuator,
    platform: MockPlatform,
    timebase: MockTimebase,
    links: LinkSupervisor,
}

impl Harness {
    fn new() -> Self {
        Self {
            actuator: MockActuator::default(),
            platform: MockPlatform::default(),
            timebase: MockTimebase::default(),
            links: LinkSupervisor::new(),
        }
    }

    fn run(
        &mut self,
        reconciler: &Reconciler<'_>,
        action: &PendingAction,
        tracker: &mut MovementTracker<'_>,
    ) -> Outcome {
        block_on(reconciler.reconcile(
            action,
            tracker,
            &mut self.links,
            &mut self.actuator,
            &mut self.timebase,
            &mut self.platform,
        ))
    }
}

fn tracker_at<'a>(
    geometry: &'a desk_core::tracker::DeskGeometry,
    height: f32,
) -> MovementTracker<'a> {
    let mut tracker = MovementTracker::new(geometry);
    tracker.observe(height);
    tracker.observe(height);
    tracker
}

#[test]
fn raise_while_standing_with_telemetry_is_refunded_without_frames() {
    let config = config(true);
    let reconciler = Reconciler::new(&config);
    let mut tracker = tracker_at(&config.geometry, 120.0);
    assert_eq!(tracker.state(), DeskState::Standing);
    let mut harness = Harness::new();

    let outcome = harness.run(&reconciler, &redeem(ActionKind::RaiseDesk), &mut tracker);

    assert_eq!(
        outcome,
        Outcome::Canceled(CancelReason::AlreadyThere(DeskState::Standing))
    );
    assert!(harness.actuator.frames.is_empty());
    assert_eq!(
        harness.platform.status_of("r-1"),
        Some(RedemptionStatus::Canceled)
    );
    assert_eq!(tracker.state(), DeskState::Standing);
}

#[test]
fn raise_while_standing_without_telemetry_still_moves() {
    let config = config(false);
    let reconciler = Reconciler::new(&config);
    let mut tracker = tracker_at(&config.geometry, 120.0);
    let mut harness = Harness::new();

    let outcome = harness.run(&reconciler, &redeem(ActionKind::RaiseDesk), &mut tracker);

    assert_eq!(outcome, Outcome::Fulfilled(Direction::Up));
    assert_eq!(harness.actuator.frames.len(), 2);
    assert_eq!(
        harness.platform.status_of("r-1"),
        Some(RedemptionStatus::Fulfilled)
    );
}

#[test]
fn raise_while_sitting_sends_stop_then_move() {
    let config = config(true);
    let reconciler = Reconciler::new(&config);
    let mut tracker = MovementTracker::new(&config.geometry);
    assert_eq!(tracker.state(), DeskState::Sitting);
    let mut harness = Harness::new();

    let outcome = harness.run(&reconciler, &redeem(ActionKind::RaiseDesk), &mut tracker);

    assert_eq!(outcome, Outcome::Fulfilled(Direction::Up));
    assert_eq!(tracker.state(), DeskState::GoingUp);
    assert_eq!(
        harness.actuator.frames,
        [
            encode_stop_command().to_vec(),
            encode_move_command(120.0).expect("encodable").to_vec(),
        ]
    );
    assert_eq!(harness.timebase.sleeps, [SETTLE_DELAY]);
    assert_eq!(
        harness.platform.status_of("r-1"),
        Some(RedemptionStatus::Fulfilled)
    );
}

#[test]
fn transmit_failure_refunds_and_flags_actuator() {
    let config = config(true);
    let reconciler = Reconciler::new(&config);
    let mut tracker = tracker_at(&config.geometry, 120.0);
    let mut harness = Harness::new();
    harness.actuator.failing_writes = 1;

    let outcome = harness.run(&reconciler, &redeem(ActionKind::LowerDesk), &mut tracker);

    assert!(matches!(
        outcome,
        Outcome::Canceled(CancelReason::TransmitFailed(_))
    ));
    assert_eq!(tracker.state(), DeskState::Standing, "state must not change");
    assert!(harness.links.flags().actuator_reconnect_required);
    assert_eq!(harness.actuator.count("write"), 1, "no inline retry");
    assert_eq!(
        harness.platform.status_of("r-1"),
        Some(RedemptionStatus::Canceled)
    );
}

#[test]
fn cheers_are_never_acknowledged() {
    let config = config(true);
    let reconciler = Reconciler::new(&config);
    let mut tracker = MovementTracker::new(&config.geometry);
    let mut harness = Harness::new();
    let action = PendingAction {
        kind: ActionKind::ToggleDesk,
        source: ActionSource::Cheer { amount: 500 },
        requester: bounded("viewer"),
    };

    let outcome = harness.run(&reconciler, &action, &mut tracker);

    assert_eq!(outcome, Outcome::Fulfilled(Direction::Up));
    assert!(harness.platform.statuses.is_empty());
    assert_eq!(
        harness.actuator.commands()[1],
        ActuatorCommand::SetHeight { millimeters: 1_200 }
    );
}

#[test]
fn toggle_while_stopped_does_nothing() {
    let config = config(true);
    let reconciler = Reconciler::new(&config);
    let mut tracker = tracker_at(&config.geometry, 100.0);
    assert_eq!(tracker.state(), DeskState::Stopped);
    let mut harness = Harness::new();
    let action = PendingAction {
        kind: ActionKind::ToggleDesk,
        source: ActionSource::Cheer { amount: 500 },
        requester: bounded("viewer"),
    };

    let outcome = harness.run(&reconciler, &action, &mut tracker);

    assert_eq!(outcome, Outcome::Ignored);
    assert!(harness.actuator.calls.is_empty());
    assert!(harness.platform.statuses.is_empty());
}

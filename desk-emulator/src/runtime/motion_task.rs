use desk_core::codec;
use desk_core::events::ControlEvent;
use embassy_time::{Duration, Ticker};
use tracing::trace;

use super::EventSender;
use crate::actuator::DeskMotor;

const STEP_INTERVAL: Duration = Duration::from_millis(100);
/// Steps between height reports while the desk is still.
const IDLE_REPORT_STEPS: u32 = 10;

/// Drives the motor and emits height notifications while subscribed.
#[embassy_executor::task]
pub async fn run(motor: &'static DeskMotor, events: EventSender<'static>) -> ! {
    let mut ticker = Ticker::every(STEP_INTERVAL);
    let mut idle_countdown: u32 = 0;

    loop {
        ticker.next().await;

        if motor.step().is_none() && idle_countdown > 0 {
            idle_countdown -= 1;
            continue;
        }
        idle_countdown = IDLE_REPORT_STEPS;
        if !motor.notifying() {
            continue;
        }

        let frame = codec::encode_height_notification(motor.height_mm());
        let Some(event) = ControlEvent::telemetry(&frame) else {
            continue;
        };
        if events.try_send(event).is_err() {
            trace!("event queue full, height sample dropped");
        }
    }
}

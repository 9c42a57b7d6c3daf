use std::path::PathBuf;
use std::thread;

use anyhow::{Context as _, Result, anyhow};
use desk_core::codec::centimeters_to_millimeters;
use desk_core::control::{ControlLoop, TICK_INTERVAL, Timebase};
use desk_core::events::ControlEvent;
use desk_core::link::Delay;
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use embassy_time::{Duration, Timer};
use static_cell::StaticCell;
use tracing::{info, warn};

use crate::actuator::{DeskMotor, EmulatedActuator};
use crate::config::Settings;
use crate::console::{self, Console};
use crate::display::DisplaySink;
use crate::platform::{CATALOG, EmulatedPlatform};
use crate::signals;

mod motion_task;

/// Depth of the inbound event queue.
pub const EVENT_QUEUE_DEPTH: usize = 16;

pub type EventChannel = Channel<CriticalSectionRawMutex, ControlEvent, EVENT_QUEUE_DEPTH>;
pub type EventSender<'a> = Sender<'a, CriticalSectionRawMutex, ControlEvent, EVENT_QUEUE_DEPTH>;
pub type EventReceiver<'a> = Receiver<'a, CriticalSectionRawMutex, ControlEvent, EVENT_QUEUE_DEPTH>;

pub(crate) static EVENTS: EventChannel = Channel::new();
static MOTOR: StaticCell<DeskMotor> = StaticCell::new();

/// Runtime options collected from the command line.
#[derive(Clone, Debug)]
pub struct Options {
    pub config: PathBuf,
    pub console: bool,
    /// Height the emulated desk powers up at; defaults to standing.
    pub start_height_cm: Option<f32>,
}

/// Pause between attempts to hand an event to a full queue.
const DELIVERY_RETRY: std::time::Duration = std::time::Duration::from_millis(20);

/// Sends `event` from a plain thread, waiting for room if the queue is full.
pub fn deliver(events: &EventSender<'_>, mut event: ControlEvent) {
    let mut warned = false;
    loop {
        match events.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Full(returned)) => {
                if !warned {
                    warn!(?returned, "event queue full, waiting for room");
                    warned = true;
                }
                event = returned;
                thread::sleep(DELIVERY_RETRY);
            }
        }
    }
}

fn core_duration_to_embassy(duration: core::time::Duration) -> Duration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    Duration::from_micros(micros)
}

/// Tick source and delays backed by the embassy time driver.
///
/// Each tick is a fresh timer started when the loop asks for it, so a tick
/// that overran never leaves owed ticks behind.
pub struct EmulatorTimebase {
    interval: Duration,
}

impl EmulatorTimebase {
    pub fn new() -> Self {
        Self::with_interval(core_duration_to_embassy(TICK_INTERVAL))
    }

    pub const fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for EmulatorTimebase {
    fn default() -> Self {
        Self::new()
    }
}

impl Delay for EmulatorTimebase {
    async fn sleep(&mut self, duration: core::time::Duration) {
        Timer::after(core_duration_to_embassy(duration)).await;
    }
}

impl Timebase for EmulatorTimebase {
    async fn next_tick(&mut self) {
        Timer::after(self.interval).await;
    }
}

/// Builds the emulated hardware and runs the controller until shutdown.
pub async fn run(spawner: Spawner, options: Options) -> Result<()> {
    let settings = Settings::load(&options.config)?;
    let credentials = settings.credentials()?;
    let config = settings.controller_config()?;
    let geometry = &config.geometry;

    let millimeters = |height_cm: f32| {
        centimeters_to_millimeters(height_cm)
            .map_err(|err| anyhow!("height {height_cm} cm cannot be emulated: {err}"))
    };
    let start_cm = options.start_height_cm.unwrap_or(geometry.standing_cm());
    let motor: &'static DeskMotor = MOTOR.init(DeskMotor::new(
        millimeters(start_cm)?,
        millimeters(geometry.sitting_cm())?,
        millimeters(geometry.standing_cm())?,
    ));
    info!(start_cm, "emulated desk powered on");

    signals::install(EVENTS.sender())?;
    spawner
        .spawn(motion_task::run(motor, EVENTS.sender()))
        .map_err(|err| anyhow!("failed to spawn motion task: {err:?}"))?;

    if options.console {
        let (raise, lower) = config
            .rewards
            .as_ref()
            .map(|rewards| (rewards.raise_title.as_str(), rewards.lower_title.as_str()))
            .unwrap_or_default();
        console::spawn(Console::new(EVENTS.sender(), motor, &CATALOG, raise, lower))
            .context("failed to start console")?;
        println!("{}", console::HELP);
    }

    let display_address = config
        .display
        .as_ref()
        .map_or("stdout", |display| display.address.as_str());
    let mut controller = ControlLoop::new(
        &config,
        EmulatedActuator::new(motor, config.actuator.clone()),
        DisplaySink::new(display_address),
        EmulatedPlatform::new(EVENTS.receiver(), &CATALOG, credentials),
        EmulatorTimebase::new(),
    );

    controller.run().await.map_err(|err| anyhow!("{err}"))
}

//! Emulated JCP35N-BLT control box.
//!
//! [`DeskMotor`] holds the physical state in atomics so the motion task, the
//! console thread and the actuator link can share it without locks.
//! [`EmulatedActuator`] is the controller's view of it: a link that accepts
//! command frames and can be knocked over from the console.

use desk_core::codec::{self, ActuatorCommand, Direction};
use desk_core::config::ActuatorEndpoint;
use desk_core::link::{LinkControl, LinkError, LinkErrorKind, LinkKind};
use desk_core::reconcile::ActuatorLink;
use portable_atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// Lowest height the frame can reach, in millimetres.
pub const MIN_HEIGHT_MM: u16 = 620;
/// Highest height the frame can reach, in millimetres.
pub const MAX_HEIGHT_MM: u16 = 1_270;
/// Travel per motion step.
pub const STEP_MM: u16 = 10;

const NO_TARGET: u32 = u32::MAX;

/// Physical desk plus the radio state of its control box.
#[derive(Debug)]
pub struct DeskMotor {
    height_mm: AtomicU16,
    target_mm: AtomicU32,
    /// Memory presets 1 (sit) and 2 (stand).
    presets_mm: [u16; 2],
    powered: AtomicBool,
    connected: AtomicBool,
    notifying: AtomicBool,
    faulted: AtomicBool,
}

/// Point-in-time view used by the console `status` command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MotorSnapshot {
    pub height_mm: u16,
    pub target_mm: Option<u16>,
    pub powered: bool,
    pub connected: bool,
    pub notifying: bool,
}

impl DeskMotor {
    pub fn new(height_mm: u16, sit_preset_mm: u16, stand_preset_mm: u16) -> Self {
        Self {
            height_mm: AtomicU16::new(clamp(height_mm)),
            target_mm: AtomicU32::new(NO_TARGET),
            presets_mm: [clamp(sit_preset_mm), clamp(stand_preset_mm)],
            powered: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            notifying: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
        }
    }

    pub fn height_mm(&self) -> u16 {
        self.height_mm.load(Ordering::Relaxed)
    }

    pub fn target_mm(&self) -> Option<u16> {
        u16::try_from(self.target_mm.load(Ordering::Relaxed)).ok()
    }

    pub fn snapshot(&self) -> MotorSnapshot {
        MotorSnapshot {
            height_mm: self.height_mm(),
            target_mm: self.target_mm(),
            powered: self.powered.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            notifying: self.notifying.load(Ordering::Relaxed),
        }
    }

    /// Executes a decoded command.
    pub fn apply(&self, command: ActuatorCommand) {
        let target = match command {
            ActuatorCommand::Stop => None,
            ActuatorCommand::SetHeight { millimeters } => Some(clamp(millimeters)),
            ActuatorCommand::Preset(Direction::Down) => Some(self.presets_mm[0]),
            ActuatorCommand::Preset(Direction::Up) => Some(self.presets_mm[1]),
        };
        self.target_mm
            .store(target.map_or(NO_TARGET, u32::from), Ordering::Relaxed);
    }

    /// Moves one step toward the target. Returns the new height while moving.
    pub fn step(&self) -> Option<u16> {
        let target = self.target_mm()?;
        let current = self.height_mm();
        let next = if current < target {
            current.saturating_add(STEP_MM).min(target)
        } else {
            current.saturating_sub(STEP_MM).max(target)
        };
        self.height_mm.store(next, Ordering::Relaxed);
        if next == target {
            self.target_mm.store(NO_TARGET, Ordering::Relaxed);
        }
        (next != current).then_some(next)
    }

    /// True when height notifications should be emitted.
    pub fn notifying(&self) -> bool {
        self.powered.load(Ordering::Relaxed)
            && self.connected.load(Ordering::Relaxed)
            && self.notifying.load(Ordering::Relaxed)
    }

    pub fn set_powered(&self, powered: bool) {
        self.powered.store(powered, Ordering::Relaxed);
        if !powered {
            self.drop_connection();
            self.target_mm.store(NO_TARGET, Ordering::Relaxed);
        }
    }

    /// Breaks the radio link as if the control box vanished mid-session.
    pub fn inject_fault(&self) {
        self.faulted.store(true, Ordering::Relaxed);
        self.drop_connection();
    }

    fn drop_connection(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.notifying.store(false, Ordering::Relaxed);
    }
}

fn clamp(millimeters: u16) -> u16 {
    millimeters.clamp(MIN_HEIGHT_MM, MAX_HEIGHT_MM)
}

/// Controller-side link to the emulated control box.
pub struct EmulatedActuator {
    motor: &'static DeskMotor,
    endpoint: ActuatorEndpoint,
    wants_notifications: bool,
}

impl EmulatedActuator {
    pub fn new(motor: &'static DeskMotor, endpoint: ActuatorEndpoint) -> Self {
        Self {
            motor,
            endpoint,
            wants_notifications: false,
        }
    }

    fn error(kind: LinkErrorKind) -> LinkError {
        LinkError::new(LinkKind::Actuator, kind)
    }

    fn ensure_connected(&self) -> Result<(), LinkError> {
        if self.motor.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Self::error(LinkErrorKind::NotConnected))
        }
    }
}

impl LinkControl for EmulatedActuator {
    async fn connect(&mut self) -> Result<(), LinkError> {
        if !self.motor.powered.load(Ordering::Relaxed) {
            warn!(address = %self.endpoint.address, "desk is powered off");
            return Err(Self::error(LinkErrorKind::Timeout));
        }
        self.motor.faulted.store(false, Ordering::Relaxed);
        self.motor.connected.store(true, Ordering::Relaxed);
        info!(address = %self.endpoint.address, "desk link up");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let was_connected = self.motor.connected.swap(false, Ordering::Relaxed);
        self.motor.notifying.store(false, Ordering::Relaxed);
        if was_connected {
            info!(address = %self.endpoint.address, "desk link down");
            Ok(())
        } else {
            Err(Self::error(LinkErrorKind::NotConnected))
        }
    }

    async fn restore_subscriptions(&mut self) -> Result<(), LinkError> {
        if self.wants_notifications {
            self.subscribe().await?;
        }
        Ok(())
    }
}

impl ActuatorLink for EmulatedActuator {
    async fn write(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        if self.motor.faulted.load(Ordering::Relaxed) {
            return Err(Self::error(LinkErrorKind::Io));
        }
        self.ensure_connected()?;

        let command = codec::parse_command_frame(frame).map_err(|err| {
            warn!(%err, "control box rejected frame");
            Self::error(LinkErrorKind::Rejected)
        })?;
        debug!(
            characteristic = %self.endpoint.data_in,
            frame = ?frame,
            ?command,
            "frame written"
        );
        self.motor.apply(command);
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<(), LinkError> {
        self.ensure_connected()?;
        self.motor.notifying.store(true, Ordering::Relaxed);
        self.wants_notifications = true;
        debug!(characteristic = %self.endpoint.data_out, "notifications enabled");
        Ok(())
    }
}

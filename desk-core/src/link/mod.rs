//! Health tracking and reconnection for the actuator and display links.
//!
//! Failures never block the caller: they only flip the link into
//! [`LinkState::ReconnectPending`]. The control loop drains pending links once
//! per tick via [`reconnect`], retrying on every tick until a reconnect sticks.

use core::fmt;
use core::time::Duration;

use log::{info, warn};

/// Pause after tearing a link down and again after bringing it back up.
pub const RECONNECT_SETTLE: Duration = Duration::from_secs(1);

/// The two long-lived connections the controller maintains.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkKind {
    Actuator,
    Display,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Actuator => f.write_str("actuator"),
            LinkKind::Display => f.write_str("display"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
    ReconnectPending,
}

/// Category of a transport failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkErrorKind {
    NotConnected,
    Rejected,
    Timeout,
    Io,
}

/// Error surfaced by a link transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkError {
    pub link: LinkKind,
    pub kind: LinkErrorKind,
}

impl LinkError {
    #[must_use]
    pub const fn new(link: LinkKind, kind: LinkErrorKind) -> Self {
        Self { link, kind }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.kind {
            LinkErrorKind::NotConnected => "not connected",
            LinkErrorKind::Rejected => "operation rejected by peer",
            LinkErrorKind::Timeout => "timed out",
            LinkErrorKind::Io => "i/o failure",
        };
        write!(f, "{} link {reason}", self.link)
    }
}

/// Connection lifecycle shared by every link transport.
#[allow(async_fn_in_trait)]
pub trait LinkControl {
    async fn connect(&mut self) -> Result<(), LinkError>;

    async fn disconnect(&mut self) -> Result<(), LinkError>;

    /// Re-arms any subscriptions lost with the previous connection.
    async fn restore_subscriptions(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Suspends the calling future; only that future is paused.
#[allow(async_fn_in_trait)]
pub trait Delay {
    async fn sleep(&mut self, duration: Duration);
}

/// Per-link health record.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LinkHealth {
    pub state: LinkState,
    pub ever_connected: bool,
    pub consecutive_failures: u32,
}

impl LinkHealth {
    const fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            ever_connected: false,
            consecutive_failures: 0,
        }
    }
}

/// Snapshot of which links await reconnection.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReconnectFlags {
    pub actuator_reconnect_required: bool,
    pub display_reconnect_required: bool,
}

/// Tracks actuator and display health independently.
#[derive(Debug, Default)]
pub struct LinkSupervisor {
    actuator: LinkHealth,
    display: LinkHealth,
}

impl LinkSupervisor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            actuator: LinkHealth::new(),
            display: LinkHealth::new(),
        }
    }

    #[must_use]
    pub const fn health(&self, link: LinkKind) -> LinkHealth {
        match link {
            LinkKind::Actuator => self.actuator,
            LinkKind::Display => self.display,
        }
    }

    fn health_mut(&mut self, link: LinkKind) -> &mut LinkHealth {
        match link {
            LinkKind::Actuator => &mut self.actuator,
            LinkKind::Display => &mut self.display,
        }
    }

    pub fn mark_connected(&mut self, link: LinkKind) {
        let health = self.health_mut(link);
        health.state = LinkState::Connected;
        health.ever_connected = true;
        health.consecutive_failures = 0;
    }

    /// Records a transmit/receive failure and schedules a reconnect.
    pub fn mark_failed(&mut self, link: LinkKind) {
        let health = self.health_mut(link);
        if health.state != LinkState::ReconnectPending {
            warn!("{link} link failed; reconnect scheduled");
        }
        health.state = LinkState::ReconnectPending;
    }

    pub fn mark_disconnected(&mut self, link: LinkKind) {
        self.health_mut(link).state = LinkState::Disconnected;
    }

    fn record_attempt_failed(&mut self, link: LinkKind) {
        let health = self.health_mut(link);
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.state = LinkState::ReconnectPending;
    }

    #[must_use]
    pub const fn is_connected(&self, link: LinkKind) -> bool {
        matches!(self.health(link).state, LinkState::Connected)
    }

    #[must_use]
    pub const fn flags(&self) -> ReconnectFlags {
        ReconnectFlags {
            actuator_reconnect_required: matches!(
                self.actuator.state,
                LinkState::ReconnectPending
            ),
            display_reconnect_required: matches!(self.display.state, LinkState::ReconnectPending),
        }
    }

    /// Runs one reconnect attempt for `link` if it is pending.
    ///
    /// Returns `None` when nothing was pending, otherwise whether the attempt
    /// succeeded. A failed attempt keeps the flag set for the next tick.
    pub async fn service<L, D>(
        &mut self,
        kind: LinkKind,
        link: &mut L,
        delay: &mut D,
    ) -> Option<bool>
    where
        L: LinkControl,
        D: Delay,
    {
        if self.health(kind).state != LinkState::ReconnectPending {
            return None;
        }

        info!("attempting to reconnect {kind} link");
        match reconnect(link, delay).await {
            Ok(()) => {
                self.mark_connected(kind);
                info!("{kind} link reconnected");
                Some(true)
            }
            Err(err) => {
                self.record_attempt_failed(kind);
                warn!(
                    "{kind} reconnect failed ({err}); attempt {} will retry next tick",
                    self.health(kind).consecutive_failures
                );
                Some(false)
            }
        }
    }
}

/// Tears the link down and brings it back: disconnect, settle, connect,
/// restore subscriptions, settle.
///
/// Disconnect errors are ignored since the link is usually already gone.
pub async fn reconnect<L, D>(link: &mut L, delay: &mut D) -> Result<(), LinkError>
where
    L: LinkControl,
    D: Delay,
{
    let _ = link.disconnect().await;
    delay.sleep(RECONNECT_SETTLE).await;
    link.connect().await?;
    link.restore_subscriptions().await?;
    delay.sleep(RECONNECT_SETTLE).await;
    Ok(())
}

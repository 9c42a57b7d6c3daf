//! Emulated rewards platform.
//!
//! Inbound events come from the shared event channel (fed by the console,
//! the motion task and the signal handler). The reward catalog lives in a
//! blocking mutex so the console thread can resolve reward titles to ids.

use core::cell::RefCell;

use desk_core::catalog::{PlatformError, PlatformErrorKind, Reward, RewardCatalog, RewardList};
use desk_core::control::EventSource;
use desk_core::events::{ControlEvent, Ident, bounded};
use desk_core::reconcile::{RedemptionLedger, RedemptionStatus};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use tracing::{info, warn};

use crate::config::Credentials;
use crate::runtime::EventReceiver;

pub type Catalog = Mutex<CriticalSectionRawMutex, RefCell<RewardList>>;

/// Rewards "stored on the platform".
pub static CATALOG: Catalog = Mutex::new(RefCell::new(RewardList::new()));

/// Looks up a reward id by exact title.
pub fn reward_id_for(catalog: &Catalog, title: &str) -> Option<Ident> {
    catalog.lock(|rewards| {
        rewards
            .borrow()
            .iter()
            .find(|reward| reward.title.as_str() == title)
            .map(|reward| reward.id.clone())
    })
}

pub struct EmulatedPlatform<'a> {
    events: EventReceiver<'a>,
    catalog: &'a Catalog,
    credentials: Credentials,
    subscribed: bool,
}

impl<'a> EmulatedPlatform<'a> {
    pub fn new(events: EventReceiver<'a>, catalog: &'a Catalog, credentials: Credentials) -> Self {
        Self {
            events,
            catalog,
            credentials,
            subscribed: false,
        }
    }

    fn authorize(&self) -> Result<(), PlatformError> {
        if self.credentials.auth_token.trim().is_empty() {
            warn!(client_id = %self.credentials.client_id, "platform refused credentials");
            return Err(PlatformError::new(PlatformErrorKind::Unauthorized));
        }
        Ok(())
    }
}

impl EventSource for EmulatedPlatform<'_> {
    async fn subscribe(&mut self, scopes: &[&'static str]) -> Result<(), PlatformError> {
        self.authorize()?;
        self.subscribed = true;
        info!(
            broadcaster = %self.credentials.broadcaster_name,
            ?scopes,
            "subscribed to platform events"
        );
        Ok(())
    }

    async fn next_event(&mut self) -> ControlEvent {
        self.events.receive().await
    }

    async fn unsubscribe(&mut self) {
        if std::mem::replace(&mut self.subscribed, false) {
            info!("event subscription stopped");
        }
    }

    async fn close(&mut self) {
        info!("platform session closed");
    }
}

impl RedemptionLedger for EmulatedPlatform<'_> {
    async fn set_redemption_status(
        &mut self,
        reward_id: &str,
        redemption_id: &str,
        status: RedemptionStatus,
    ) -> Result<(), PlatformError> {
        self.authorize()?;
        info!(reward_id, redemption_id, %status, "redemption updated");
        Ok(())
    }
}

impl RewardCatalog for EmulatedPlatform<'_> {
    async fn list_rewards(&mut self) -> Result<RewardList, PlatformError> {
        self.authorize()?;
        Ok(self.catalog.lock(|rewards| rewards.borrow().clone()))
    }

    async fn create_reward(&mut self, title: &str, cost: u32) -> Result<Reward, PlatformError> {
        self.authorize()?;
        self.catalog.lock(|rewards| {
            let mut rewards = rewards.borrow_mut();
            let reward = Reward {
                id: bounded(&format!("reward-{}", rewards.len() + 1)),
                title: bounded(title),
                cost,
            };
            rewards
                .push(reward.clone())
                .map_err(|_| PlatformError::new(PlatformErrorKind::Rejected))?;
            info!(id = %reward.id, title, cost, "reward created");
            Ok(reward)
        })
    }
}

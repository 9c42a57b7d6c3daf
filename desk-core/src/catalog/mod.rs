//! Channel point reward catalog reconciliation.
//!
//! At startup the controller makes sure a "raise" and a "lower" reward exist on
//! the platform. Rewards are matched by exact title among the ones this
//! application may manage; missing ones are created.

use core::fmt;

use heapless::Vec;
use log::info;

use crate::config::RewardSettings;
use crate::events::Ident;
use crate::reconcile::ActionKind;

/// Price used when the configuration does not name one.
pub const DEFAULT_REWARD_COST: u32 = 1000;
/// Platform limit on custom rewards per channel.
pub const MAX_REWARDS: usize = 50;

/// Category of a platform call failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlatformErrorKind {
    /// Credentials were refused.
    Unauthorized,
    Unavailable,
    /// Request was understood but refused.
    Rejected,
    /// Response could not be interpreted.
    Malformed,
}

/// Error returned by the rewards platform client.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
}

impl PlatformError {
    #[must_use]
    pub const fn new(kind: PlatformErrorKind) -> Self {
        Self { kind }
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PlatformErrorKind::Unauthorized => f.write_str("platform refused credentials"),
            PlatformErrorKind::Unavailable => f.write_str("platform unavailable"),
            PlatformErrorKind::Rejected => f.write_str("platform rejected the request"),
            PlatformErrorKind::Malformed => f.write_str("malformed platform response"),
        }
    }
}

/// A custom reward as listed by the platform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reward {
    pub id: Ident,
    pub title: Ident,
    pub cost: u32,
}

pub type RewardList = Vec<Reward, MAX_REWARDS>;

/// Reward management operations used during startup.
#[allow(async_fn_in_trait)]
pub trait RewardCatalog {
    /// Lists rewards this application is allowed to manage.
    async fn list_rewards(&mut self) -> Result<RewardList, PlatformError>;

    async fn create_reward(&mut self, title: &str, cost: u32) -> Result<Reward, PlatformError>;
}

/// Reward ids bound to desk actions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeskRewards {
    pub raise: Ident,
    pub lower: Ident,
}

impl DeskRewards {
    /// Maps a redeemed reward to the action it stands for.
    #[must_use]
    pub fn kind_for(&self, reward_id: &str) -> Option<ActionKind> {
        if self.raise.as_str() == reward_id {
            Some(ActionKind::RaiseDesk)
        } else if self.lower.as_str() == reward_id {
            Some(ActionKind::LowerDesk)
        } else {
            None
        }
    }
}

/// Reuses rewards whose title matches, creates the rest.
pub async fn ensure_desk_rewards<C>(
    catalog: &mut C,
    settings: &RewardSettings,
) -> Result<DeskRewards, PlatformError>
where
    C: RewardCatalog,
{
    let existing = catalog.list_rewards().await?;
    let find = |title: &str| {
        existing
            .iter()
            .find(|reward| reward.title.as_str() == title)
            .map(|reward| reward.id.clone())
    };
    let raise = find(settings.raise_title.as_str());
    let lower = find(settings.lower_title.as_str());

    let raise = match raise {
        Some(id) => id,
        None => {
            info!("creating reward \"{}\"", settings.raise_title);
            catalog
                .create_reward(settings.raise_title.as_str(), settings.cost)
                .await?
                .id
        }
    };
    let lower = match lower {
        Some(id) => id,
        None => {
            info!("creating reward \"{}\"", settings.lower_title);
            catalog
                .create_reward(settings.lower_title.as_str(), settings.cost)
                .await?
                .id
        }
    };

    Ok(DeskRewards { raise, lower })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::bounded;
    use embassy_futures::block_on;
    use std::vec::Vec as StdVec;

    #[derive(Default)]
    struct MemoryCatalog {
        rewards: RewardList,
        created: StdVec<(Ident, u32)>,
        fail_list: bool,
    }

    impl MemoryCatalog {
        fn with(titles: &[(&str, &str)]) -> Self {
            let mut catalog = Self::default();
            for (id, title) in titles {
                catalog
                    .rewards
                    .push(Reward {
                        id: bounded(id),
                        title: bounded(title),
                        cost: DEFAULT_REWARD_COST,
                    })
                    .expect("capacity");
            }
            catalog
        }
    }

    impl RewardCatalog for MemoryCatalog {
        async fn list_rewards(&mut self) -> Result<RewardList, PlatformError> {
            if self.fail_list {
                return Err(PlatformError::new(PlatformErrorKind::Unauthorized));
            }
            Ok(self.rewards.clone())
        }

        async fn create_reward(&mut self, title: &str, cost: u32) -> Result<Reward, PlatformError> {
            let reward = Reward {
                id: bounded(title),
                title: bounded(title),
                cost,
            };
            self.created.push((reward.title.clone(), cost));
            self.rewards.push(reward.clone()).expect("capacity");
            Ok(reward)
        }
    }

    fn settings() -> RewardSettings {
        RewardSettings::new("Desk Up", "Desk Down").expect("titles")
    }

    #[test]
    fn existing_rewards_are_reused() {
        let mut catalog = MemoryCatalog::with(&[("a1", "Desk Up"), ("b2", "Desk Down")]);

        let rewards = block_on(ensure_desk_rewards(&mut catalog, &settings())).expect("rewards");

        assert_eq!(rewards.raise.as_str(), "a1");
        assert_eq!(rewards.lower.as_str(), "b2");
        assert!(catalog.created.is_empty());
    }

    #[test]
    fn missing_rewards_are_created_at_configured_cost() {
        let mut catalog = MemoryCatalog::with(&[("a1", "Desk Up"), ("zz", "desk down")]);
        let mut settings = settings();
        settings.cost = 500;

        let rewards = block_on(ensure_desk_rewards(&mut catalog, &settings)).expect("rewards");

        assert_eq!(rewards.raise.as_str(), "a1");
        assert_eq!(rewards.lower.as_str(), "Desk Down");
        assert_eq!(catalog.created.len(), 1, "title match is case-sensitive");
        assert_eq!(catalog.created[0].1, 500);
    }

    #[test]
    fn listing_failure_propagates() {
        let mut catalog = MemoryCatalog {
            fail_list: true,
            ..MemoryCatalog::default()
        };
        let result = block_on(ensure_desk_rewards(&mut catalog, &settings()));
        assert_eq!(
            result,
            Err(PlatformError::new(PlatformErrorKind::Unauthorized))
        );
    }

    #[test]
    fn reward_ids_map_to_actions() {
        let rewards = DeskRewards {
            raise: bounded("up"),
            lower: bounded("down"),
        };
        assert_eq!(rewards.kind_for("up"), Some(ActionKind::RaiseDesk));
        assert_eq!(rewards.kind_for("down"), Some(ActionKind::LowerDesk));
        assert_eq!(rewards.kind_for("other"), None);
    }
}

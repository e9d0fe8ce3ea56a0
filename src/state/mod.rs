use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use moka::future::Cache;
use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{AdminConfig, ApiConfig, CacheConfig, RealtimeConfig, RewardsConfig};
use crate::entities::{quest, user};
use crate::models::referral::ReferralStatsView;
use crate::models::user::UserView;
use crate::realtime::{self, ChangeBus, ChangeFilter, LiveList, Table};
use crate::visits::SessionVisits;
use crate::{quests, users};

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub cache: Arc<ApiCache>,
    pub bus: ChangeBus,
    pub visits: SessionVisits,
    /// Every user ranked by points, refreshed on any `users` change.
    pub leaderboard: LiveList<UserView>,
    /// Every quest newest first, refreshed on any `quests` change.
    pub quests: LiveList<quest::Model>,
    pub admin: AdminConfig,
    pub rewards: RewardsConfig,
    pub realtime: RealtimeConfig,
    pub start_time: Instant,
}

impl AppState {
    /// Loads the live views and starts the background tasks that keep them
    /// and the caches fresh. The tasks stop when `shutdown` flips to `true`.
    pub async fn build(
        database: DatabaseConnection,
        config: &ApiConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, Vec<JoinHandle<()>>)> {
        let bus = ChangeBus::new(config.realtime.channel_capacity);
        let cache = Arc::new(ApiCache::new(&config.cache));

        let leaderboard_db = database.clone();
        let (leaderboard, leaderboard_task) = LiveList::spawn(
            "leaderboard",
            &bus,
            ChangeFilter::tables(&[Table::Users]),
            move || {
                let database = leaderboard_db.clone();
                async move {
                    let ranked = users::ranked_users(&database).await?;
                    let rows: Vec<UserView> = ranked.iter().map(UserView::from).collect();
                    Ok::<_, anyhow::Error>(rows)
                }
            },
            shutdown.clone(),
        )
        .await
        .context("Failed to load leaderboard")?;

        let quests_db = database.clone();
        let (quest_list, quests_task) = LiveList::spawn(
            "quests",
            &bus,
            ChangeFilter::tables(&[Table::Quests]),
            move || {
                let database = quests_db.clone();
                async move { Ok::<_, anyhow::Error>(quests::list_quests(&database).await?) }
            },
            shutdown.clone(),
        )
        .await
        .context("Failed to load quests")?;

        let invalidator = tokio::spawn(realtime::run_cache_invalidator(
            bus.clone(),
            Arc::clone(&cache),
            shutdown,
        ));

        let visits = SessionVisits::new(
            config.cache.sessions_max_capacity,
            config.cache.sessions_idle(),
            config.cache.sessions_dir.clone(),
        );

        let state = Self {
            database,
            cache,
            bus,
            visits,
            leaderboard,
            quests: quest_list,
            admin: config.admin.clone(),
            rewards: config.rewards,
            realtime: config.realtime,
            start_time: Instant::now(),
        };
        Ok((state, vec![leaderboard_task, quests_task, invalidator]))
    }
}

pub struct ApiCache {
    pub users: Cache<String, Arc<user::Model>>,
    pub referral_stats: Cache<String, Arc<ReferralStatsView>>,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        let users = Cache::builder()
            .max_capacity(config.users_max_capacity)
            .time_to_live(config.users_ttl())
            .time_to_idle(Duration::from_secs(config.users_ttl_seconds / 2 + 1))
            .build();

        let referral_stats = Cache::builder()
            .max_capacity(config.referrals_max_capacity)
            .time_to_live(config.referrals_ttl())
            .time_to_idle(Duration::from_secs(config.referrals_ttl_seconds / 2 + 1))
            .build();

        Self {
            users,
            referral_stats,
        }
    }

    /// Drops the cached views of one wallet. Write paths call this before
    /// responding so a follow-up read never sees the old balance.
    pub async fn forget_wallet(&self, wallet: &str) {
        self.users.invalidate(wallet).await;
        self.referral_stats.invalidate(wallet).await;
    }
}

//! Shared fixtures for database-backed tests.

use chrono::Utc;
use migration::MigratorTrait;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};

use crate::config::{
    AdminConfig, ApiConfig, CacheConfig, DatabaseConfig, RealtimeConfig, RewardsConfig,
    ServerConfig,
};
use crate::entities::user;

/// Fresh in-memory SQLite database with every migration applied. The pool
/// holds a single connection since each SQLite memory connection is its own
/// database.
pub async fn memory_database() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .expect("sqlite memory database");
    migration::Migrator::up(&db, None)
        .await
        .expect("migrations apply");
    db
}

pub async fn insert_user(db: &DatabaseConnection, wallet: &str, points: i64) -> user::Model {
    user::ActiveModel {
        wallet: Set(wallet.to_string()),
        email: Set(format!("{wallet}@example.com")),
        twitter_username: Set(format!("tw_{wallet}")),
        points: Set(points),
        joined_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .expect("user inserted")
}

pub fn test_config(admin_wallet: &str) -> ApiConfig {
    ApiConfig {
        server: ServerConfig {
            host: None,
            port: 8080,
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: Some(1),
        },
        admin: AdminConfig {
            wallet: admin_wallet.to_ascii_lowercase(),
            site_url: "https://noxara.xyz".to_string(),
        },
        rewards: RewardsConfig::default(),
        cache: CacheConfig {
            users_max_capacity: 1_000,
            users_ttl_seconds: 60,
            referrals_max_capacity: 1_000,
            referrals_ttl_seconds: 60,
            sessions_idle_seconds: 600,
            sessions_max_capacity: 1_000,
            sessions_dir: None,
        },
        realtime: RealtimeConfig::default(),
    }
}

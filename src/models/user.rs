use serde::{Deserialize, Serialize};

use crate::entities::user;
use crate::waitlist::shorten_address;

/// Public projection of a waitlist member; the email is never exposed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub wallet: String,
    pub twitter_username: String,
    pub points: i64,
    pub joined_at: i64,
}

impl From<&user::Model> for UserView {
    fn from(model: &user::Model) -> Self {
        Self {
            wallet: model.wallet.clone(),
            twitter_username: model.twitter_username.clone(),
            points: model.points,
            joined_at: model.joined_at.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminUserView {
    pub wallet: String,
    pub display_wallet: String,
    pub email: String,
    pub twitter_username: String,
    pub points: i64,
    pub joined_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    pub rank: u64,
    pub wallet: String,
    pub display_wallet: String,
    pub twitter_username: String,
    pub points: i64,
    pub is_admin: bool,
    pub is_current_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardResponse {
    pub total_users: u64,
    pub top_points: i64,
    pub search: Option<String>,
    pub offset: u64,
    pub limit: u64,
    pub has_more: bool,
    pub next_offset: Option<u64>,
    pub entries: Vec<LeaderboardRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub wallet_address: Option<String>,
    pub email: String,
    pub twitter_username: String,
    #[serde(default, alias = "ref")]
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub status: &'static str,
    pub user: UserView,
    pub referral_code: Option<String>,
    pub referral: &'static str,
    pub referrer_bonus: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointsUpdateRequest {
    /// Raw admin input; parsed server side so malformed values are rejected
    /// with a validation error instead of a deserialisation failure.
    pub points: serde_json::Value,
}

impl From<&user::Model> for AdminUserView {
    fn from(model: &user::Model) -> Self {
        Self {
            wallet: model.wallet.clone(),
            display_wallet: shorten_address(&model.wallet),
            email: model.email.clone(),
            twitter_username: model.twitter_username.clone(),
            points: model.points,
            joined_at: model.joined_at.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminOverview {
    pub total_users: u64,
    pub total_points: i64,
    pub active_quests: usize,
    pub total_quests: usize,
    pub users: Vec<AdminUserView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminUsersPage {
    pub offset: u64,
    pub limit: u64,
    pub has_more: bool,
    pub next_offset: Option<u64>,
    pub users: Vec<AdminUserView>,
}

//! Quest catalogue and completion.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{completed_quest, quest, user};
use crate::models::quest::QuestForm;
use crate::referrals::is_unique_violation;
use crate::visits::{VisitError, VisitTracker, can_complete};

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_INACTIVE: &str = "inactive";
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 5_000;
pub const MAX_LINK_LEN: usize = 2_048;
pub const MAX_REWARD_POINTS: i64 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum QuestError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("Quest {0} not found")]
    NotFound(Uuid),
    #[error("Quest {0} is not active")]
    Inactive(Uuid),
    #[error("Wallet {0} is not on the waitlist")]
    NotRegistered(String),
    #[error("Quest already completed")]
    AlreadyCompleted,
    #[error("Visit the quest link before completing it")]
    LinkNotVisited,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Visit(#[from] VisitError),
}

/// Validated admin input for creating or editing a quest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestDraft {
    pub title: String,
    pub description: String,
    pub reward_points: i64,
    pub quest_link: Option<String>,
    pub status: &'static str,
}

impl QuestDraft {
    pub fn from_form(form: QuestForm, default_reward: i64) -> Result<Self, QuestError> {
        let title = form.title.trim();
        if title.is_empty() {
            return Err(QuestError::Invalid("Quest title is required".into()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(QuestError::Invalid(format!(
                "Quest title exceeds {MAX_TITLE_LEN} character limit"
            )));
        }
        let description = form.description.trim();
        if description.is_empty() {
            return Err(QuestError::Invalid("Quest description is required".into()));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(QuestError::Invalid(format!(
                "Quest description exceeds {MAX_DESCRIPTION_LEN} character limit"
            )));
        }

        let reward_points = form.reward_points.unwrap_or(default_reward);
        if !(1..=MAX_REWARD_POINTS).contains(&reward_points) {
            return Err(QuestError::Invalid(format!(
                "Reward points must be within 1..={MAX_REWARD_POINTS}"
            )));
        }

        Ok(Self {
            title: title.to_string(),
            description: description.to_string(),
            reward_points,
            quest_link: normalize_link(form.quest_link.as_deref())?,
            status: normalize_status(form.status.as_deref())?,
        })
    }
}

pub fn normalize_status(value: Option<&str>) -> Result<&'static str, QuestError> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some(STATUS_ACTIVE) => Ok(STATUS_ACTIVE),
        Some(STATUS_INACTIVE) => Ok(STATUS_INACTIVE),
        Some(other) => Err(QuestError::Invalid(format!("Unknown quest status {other}"))),
    }
}

/// Blank links mean "no link". Anything else must be an http(s) URL.
pub fn normalize_link(value: Option<&str>) -> Result<Option<String>, QuestError> {
    let Some(link) = value.map(str::trim).filter(|link| !link.is_empty()) else {
        return Ok(None);
    };
    if link.len() > MAX_LINK_LEN {
        return Err(QuestError::Invalid(format!(
            "Quest link exceeds {MAX_LINK_LEN} character limit"
        )));
    }
    let lower = link.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !link.chars().any(char::is_whitespace) => {
            Ok(Some(link.to_string()))
        }
        _ => Err(QuestError::Invalid(
            "Quest link must be an http(s) URL".into(),
        )),
    }
}

/// Every quest, newest first.
pub async fn list_quests<C: ConnectionTrait>(conn: &C) -> Result<Vec<quest::Model>, DbErr> {
    quest::Entity::find()
        .order_by_desc(quest::Column::CreatedAt)
        .all(conn)
        .await
}

pub async fn list_active_quests<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<quest::Model>, DbErr> {
    quest::Entity::find()
        .filter(quest::Column::Status.eq(STATUS_ACTIVE))
        .order_by_desc(quest::Column::CreatedAt)
        .all(conn)
        .await
}

pub async fn find_quest<C: ConnectionTrait>(
    conn: &C,
    quest_id: Uuid,
) -> Result<quest::Model, QuestError> {
    quest::Entity::find_by_id(quest_id)
        .one(conn)
        .await?
        .ok_or(QuestError::NotFound(quest_id))
}

pub async fn create_quest<C: ConnectionTrait>(
    conn: &C,
    draft: QuestDraft,
    created_by: &str,
) -> Result<quest::Model, QuestError> {
    let now = Utc::now();
    let model = quest::ActiveModel {
        quest_id: Set(Uuid::new_v4()),
        title: Set(draft.title),
        description: Set(draft.description),
        reward_points: Set(draft.reward_points),
        status: Set(draft.status.to_string()),
        quest_link: Set(draft.quest_link),
        created_by: Set(created_by.to_string()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(conn)
    .await?;
    info!(quest_id = %model.quest_id, title = %model.title, "Quest created");
    Ok(model)
}

pub async fn update_quest<C: ConnectionTrait>(
    conn: &C,
    quest_id: Uuid,
    draft: QuestDraft,
) -> Result<quest::Model, QuestError> {
    let mut active = find_quest(conn, quest_id).await?.into_active_model();
    active.title = Set(draft.title);
    active.description = Set(draft.description);
    active.reward_points = Set(draft.reward_points);
    active.status = Set(draft.status.to_string());
    active.quest_link = Set(draft.quest_link);
    active.updated_at = Set(Utc::now().into());
    let model = active.update(conn).await?;
    info!(quest_id = %model.quest_id, status = %model.status, "Quest updated");
    Ok(model)
}

/// Deleting a quest also removes its completion records.
pub async fn delete_quest<C: ConnectionTrait>(conn: &C, quest_id: Uuid) -> Result<(), QuestError> {
    completed_quest::Entity::delete_many()
        .filter(completed_quest::Column::QuestId.eq(quest_id))
        .exec(conn)
        .await?;
    let result = quest::Entity::delete_by_id(quest_id).exec(conn).await?;
    if result.rows_affected == 0 {
        return Err(QuestError::NotFound(quest_id));
    }
    info!(%quest_id, "Quest deleted");
    Ok(())
}

pub async fn completed_quest_ids<C: ConnectionTrait>(
    conn: &C,
    wallet: &str,
) -> Result<Vec<Uuid>, DbErr> {
    completed_quest::Entity::find()
        .select_only()
        .column(completed_quest::Column::QuestId)
        .filter(completed_quest::Column::Wallet.eq(wallet))
        .order_by_asc(completed_quest::Column::CompletedAt)
        .into_tuple::<Uuid>()
        .all(conn)
        .await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub quest: quest::Model,
    /// Balance after the reward was credited.
    pub points: i64,
}

/// Records the completion and credits the reward in one transaction.
pub async fn complete_quest(
    db: &DatabaseConnection,
    wallet: &str,
    quest_id: Uuid,
    link_visited: bool,
) -> Result<Completion, QuestError> {
    let quest = find_quest(db, quest_id).await?;
    if quest.status != STATUS_ACTIVE {
        return Err(QuestError::Inactive(quest_id));
    }
    if user::Entity::find_by_id(wallet.to_string())
        .one(db)
        .await?
        .is_none()
    {
        return Err(QuestError::NotRegistered(wallet.to_string()));
    }
    let already = completed_quest::Entity::find()
        .filter(completed_quest::Column::Wallet.eq(wallet))
        .filter(completed_quest::Column::QuestId.eq(quest_id))
        .one(db)
        .await?
        .is_some();
    if already {
        return Err(QuestError::AlreadyCompleted);
    }
    if !can_complete(quest.quest_link.as_deref(), link_visited) {
        return Err(QuestError::LinkNotVisited);
    }

    let txn = db.begin().await?;
    let inserted = completed_quest::ActiveModel {
        id: Set(Uuid::new_v4()),
        wallet: Set(wallet.to_string()),
        quest_id: Set(quest_id),
        completed_at: Set(Utc::now().into()),
    }
    .insert(&txn)
    .await;
    if let Err(err) = inserted {
        txn.rollback().await?;
        if is_unique_violation(&err) {
            return Err(QuestError::AlreadyCompleted);
        }
        return Err(err.into());
    }

    user::Entity::update_many()
        .col_expr(
            user::Column::Points,
            Expr::col(user::Column::Points).add(quest.reward_points),
        )
        .filter(user::Column::Wallet.eq(wallet))
        .exec(&txn)
        .await?;
    let points = user::Entity::find_by_id(wallet.to_string())
        .one(&txn)
        .await?
        .map(|user| user.points)
        .ok_or_else(|| QuestError::NotRegistered(wallet.to_string()))?;
    txn.commit().await?;

    info!(wallet, %quest_id, reward = quest.reward_points, points, "Quest completed");
    Ok(Completion { quest, points })
}

/// Completion as driven by a client session: reads the visited flag from
/// the tracker and clears it once the reward is credited.
pub async fn complete_with_tracker(
    db: &DatabaseConnection,
    tracker: &VisitTracker,
    wallet: &str,
    quest_id: Uuid,
) -> Result<Completion, QuestError> {
    let completion = complete_quest(db, wallet, quest_id, tracker.is_visited(&quest_id)).await?;
    if let Err(err) = tracker.clear(&quest_id) {
        warn!(%quest_id, "Failed to clear visited flag: {err}");
    }
    Ok(completion)
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::quest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestView {
    pub quest_id: Uuid,
    pub title: String,
    pub description: String,
    pub reward_points: i64,
    pub status: String,
    pub quest_link: Option<String>,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl QuestView {
    pub fn from_model(model: &quest::Model, completed: Option<bool>) -> Self {
        Self {
            quest_id: model.quest_id,
            title: model.title.clone(),
            description: model.description.clone(),
            reward_points: model.reward_points,
            status: model.status.clone(),
            quest_link: model.quest_link.clone(),
            created_by: model.created_by.clone(),
            created_at: model.created_at.timestamp(),
            updated_at: model.updated_at.timestamp(),
            completed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestForm {
    pub title: String,
    pub description: String,
    pub reward_points: Option<i64>,
    pub quest_link: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestBoard {
    pub wallet: Option<String>,
    pub points: Option<i64>,
    pub completed_count: usize,
    pub active_count: usize,
    pub remaining_count: usize,
    pub quests: Vec<QuestView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitResponse {
    pub quest_id: Uuid,
    pub quest_link: Option<String>,
    pub visited: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    pub status: &'static str,
    pub quest_id: Uuid,
    pub wallet: String,
    pub reward_points: i64,
    pub points: i64,
}

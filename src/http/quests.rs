use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::models::quest::{CompletionResponse, QuestBoard, QuestView, VisitResponse};
use crate::quests::{STATUS_ACTIVE, complete_with_tracker, completed_quest_ids, find_quest};
use crate::realtime::{ChangeKind, Table};
use crate::state::AppState;
use crate::users::find_user;

use super::{HttpError, Session, bad_request};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(quest_board))
        .route("/{quest_id}/visit", post(visit_quest))
        .route("/{quest_id}/complete", post(complete))
}

pub(super) fn parse_quest_id(raw: &str) -> Result<Uuid, HttpError> {
    Uuid::parse_str(raw.trim()).map_err(|_| bad_request(format!("Invalid quest id {raw}")))
}

async fn quest_board(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<QuestBoard>, HttpError> {
    let snapshot = state.quests.current();
    let active: Vec<_> = snapshot
        .iter()
        .filter(|quest| quest.status == STATUS_ACTIVE)
        .collect();

    let (points, completed) = match session.wallet.as_deref() {
        Some(wallet) => {
            let points = find_user(&state.database, wallet)
                .await?
                .map(|user| user.points);
            let ids: HashSet<Uuid> = completed_quest_ids(&state.database, wallet)
                .await?
                .into_iter()
                .collect();
            (points, Some(ids))
        }
        None => (None, None),
    };

    let quests: Vec<QuestView> = active
        .iter()
        .map(|quest| {
            let done = completed
                .as_ref()
                .map(|ids| ids.contains(&quest.quest_id));
            QuestView::from_model(quest, done)
        })
        .collect();
    let completed_count = quests
        .iter()
        .filter(|quest| quest.completed == Some(true))
        .count();

    Ok(Json(QuestBoard {
        wallet: session.wallet.clone(),
        points,
        completed_count,
        active_count: quests.len(),
        remaining_count: quests.len() - completed_count,
        quests,
    }))
}

/// Records that this session opened the quest link.
async fn visit_quest(
    Path(quest_id): Path<String>,
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<VisitResponse>, HttpError> {
    let quest_id = parse_quest_id(&quest_id)?;
    let quest = find_quest(&state.database, quest_id).await?;
    let tracker = session.tracker(&state.visits).await?;
    tracker.mark_visited(&quest_id)?;

    Ok(Json(VisitResponse {
        quest_id,
        quest_link: quest.quest_link,
        visited: true,
    }))
}

async fn complete(
    Path(quest_id): Path<String>,
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<CompletionResponse>, HttpError> {
    let quest_id = parse_quest_id(&quest_id)?;
    let wallet = session.require_wallet()?;
    let tracker = session.tracker(&state.visits).await?;

    let completion = complete_with_tracker(&state.database, &tracker, wallet, quest_id).await?;
    state.cache.forget_wallet(wallet).await;
    state.bus.publish(Table::CompletedQuests, ChangeKind::Insert);
    state.bus.publish(Table::Users, ChangeKind::Update);

    Ok(Json(CompletionResponse {
        status: "completed",
        quest_id,
        wallet: wallet.to_string(),
        reward_points: completion.quest.reward_points,
        points: completion.points,
    }))
}

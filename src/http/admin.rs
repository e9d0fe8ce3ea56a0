//! Admin-only routes. Every handler takes an [`AdminSession`], so requests
//! from any other wallet are refused with 403 before touching the store.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::models::quest::{QuestForm, QuestView};
use crate::models::user::{
    AdminOverview, AdminUserView, AdminUsersPage, PointsUpdateRequest, UserView,
};
use crate::quests::{QuestDraft, STATUS_ACTIVE, create_quest, delete_quest, update_quest};
use crate::realtime::{ChangeFilter, ChangeKind, Pager, Table, collect_pages, page_window};
use crate::state::AppState;
use crate::users::{set_points, user_count, users_page};

use super::quests::parse_quest_id;
use super::{AdminSession, HttpError, bad_request, canonical_path_wallet};

const OVERVIEW_USERS: u64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/overview", get(overview))
        .route("/users", get(list_users))
        .route("/users/export", get(export_users))
        .route("/users/{wallet}/points", put(update_points))
        .route("/quests", get(list_quests).post(create))
        .route("/quests/{quest_id}", put(update).delete(remove))
}

async fn overview(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<AdminOverview>, HttpError> {
    let total_users = user_count(&state.database).await?;
    let total_points = state
        .leaderboard
        .current()
        .iter()
        .map(|user| user.points)
        .sum();
    let quests = state.quests.current();
    let active_quests = quests
        .iter()
        .filter(|quest| quest.status == STATUS_ACTIVE)
        .count();
    let users = users_page(&state.database, 0, OVERVIEW_USERS).await?;

    Ok(Json(AdminOverview {
        total_users,
        total_points,
        active_quests,
        total_quests: quests.len(),
        users: users.iter().map(AdminUserView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    #[serde(default)]
    offset: u64,
}

async fn list_users(
    _admin: AdminSession,
    Query(params): Query<PageParams>,
    State(state): State<AppState>,
) -> Result<Json<AdminUsersPage>, HttpError> {
    let limit = state.realtime.page_size;
    let users = users_page(&state.database, params.offset, limit).await?;
    let window = page_window(params.offset, limit, users.len());
    Ok(Json(AdminUsersPage {
        offset: window.offset,
        limit: window.limit,
        has_more: window.has_more,
        next_offset: window.next_offset,
        users: users.iter().map(AdminUserView::from).collect(),
    }))
}

/// Every user, fetched page by page. A user write during the walk starts
/// it over from page zero.
async fn export_users(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<AdminUserView>>, HttpError> {
    let mut subscription = state.bus.subscribe(ChangeFilter::tables(&[Table::Users]));
    let mut pager = Pager::new(state.realtime.page_size);
    let users = collect_pages(&mut pager, &mut subscription, |offset, limit| {
        users_page(&state.database, offset, limit)
    })
    .await?;
    Ok(Json(users.iter().map(AdminUserView::from).collect()))
}

async fn update_points(
    admin: AdminSession,
    Path(wallet): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<PointsUpdateRequest>,
) -> Result<Json<UserView>, HttpError> {
    let wallet = canonical_path_wallet(&wallet)?;
    let raw = match payload.points {
        Value::String(raw) => raw,
        Value::Number(number) => number.to_string(),
        _ => return Err(bad_request("Points must be a number")),
    };

    let user = set_points(&state.database, &wallet, &raw).await?;
    state.cache.forget_wallet(&user.wallet).await;
    state.bus.publish(Table::Users, ChangeKind::Update);
    info!(admin = %admin.wallet, wallet = %user.wallet, points = user.points, "Admin edited points");
    Ok(Json(UserView::from(&user)))
}

async fn list_quests(_admin: AdminSession, State(state): State<AppState>) -> Json<Vec<QuestView>> {
    let quests = state.quests.current();
    Json(
        quests
            .iter()
            .map(|quest| QuestView::from_model(quest, None))
            .collect(),
    )
}

async fn create(
    admin: AdminSession,
    State(state): State<AppState>,
    Json(form): Json<QuestForm>,
) -> Result<(StatusCode, Json<QuestView>), HttpError> {
    let draft = QuestDraft::from_form(form, state.rewards.default_quest_reward)?;
    let quest = create_quest(&state.database, draft, &admin.wallet).await?;
    state.bus.publish(Table::Quests, ChangeKind::Insert);
    Ok((StatusCode::CREATED, Json(QuestView::from_model(&quest, None))))
}

async fn update(
    _admin: AdminSession,
    Path(quest_id): Path<String>,
    State(state): State<AppState>,
    Json(form): Json<QuestForm>,
) -> Result<Json<QuestView>, HttpError> {
    let quest_id = parse_quest_id(&quest_id)?;
    let draft = QuestDraft::from_form(form, state.rewards.default_quest_reward)?;
    let quest = update_quest(&state.database, quest_id, draft).await?;
    state.bus.publish(Table::Quests, ChangeKind::Update);
    Ok(Json(QuestView::from_model(&quest, None)))
}

async fn remove(
    _admin: AdminSession,
    Path(quest_id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, HttpError> {
    let quest_id = parse_quest_id(&quest_id)?;
    delete_quest(&state.database, quest_id).await?;
    state.bus.publish(Table::CompletedQuests, ChangeKind::Delete);
    state.bus.publish(Table::Quests, ChangeKind::Delete);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::http::tests::{ADMIN, call, test_app, wait_until};
    use crate::testing::insert_user;
    use crate::users::find_user;

    #[tokio::test]
    async fn non_admins_are_forbidden() {
        let (app, _state, _shutdown) = test_app().await;
        let (status, body) = call(&app, Method::GET, "/admin/overview", &[], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Admin wallet required");

        let (status, _) = call(
            &app,
            Method::POST,
            "/admin/quests",
            &[("x-wallet-address", "0xbbbb")],
            Some(json!({ "title": "t", "description": "d" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn quest_lifecycle() {
        let (app, state, _shutdown) = test_app().await;
        let admin_header = ADMIN.to_uppercase().replacen("0X", "0x", 1);
        let headers = [("x-wallet-address", admin_header.as_str())];

        let (status, created) = call(
            &app,
            Method::POST,
            "/admin/quests",
            &headers,
            Some(json!({
                "title": "Follow REVA",
                "description": "Follow us on X",
                "quest_link": "https://x.com/reva",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["reward_points"], 200);
        assert_eq!(created["created_by"], ADMIN);
        let quest_id = created["quest_id"].as_str().unwrap().to_string();

        let quests = state.quests.clone();
        wait_until(move || quests.current().len() == 1).await;

        let (status, updated) = call(
            &app,
            Method::PUT,
            &format!("/admin/quests/{quest_id}"),
            &headers,
            Some(json!({
                "title": "Follow REVA",
                "description": "Follow us on X",
                "reward_points": 500,
                "quest_link": "",
                "status": "inactive",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["reward_points"], 500);
        assert!(updated["quest_link"].is_null());

        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/admin/quests/{quest_id}"),
            &headers,
            Some(json!({ "title": "x", "description": "y", "status": "paused" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/admin/quests/{quest_id}"),
            &headers,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let quests = state.quests.clone();
        wait_until(move || quests.current().is_empty()).await;
    }

    #[tokio::test]
    async fn points_edit_validates_input() {
        let (app, state, _shutdown) = test_app().await;
        insert_user(&state.database, "0xaaaa", 10_000).await;
        insert_user(&state.database, "0xbbbb", 10_000).await;
        let headers = [("x-wallet-address", ADMIN)];

        let (status, body) = call(
            &app,
            Method::PUT,
            "/admin/users/0xAAAA/points",
            &headers,
            Some(json!({ "points": "12abc" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid points"));

        let (status, body) = call(
            &app,
            Method::PUT,
            "/admin/users/0xaaaa/points",
            &headers,
            Some(json!({ "points": 777 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["points"], 777);
        let untouched = find_user(&state.database, "0xbbbb").await.unwrap().unwrap();
        assert_eq!(untouched.points, 10_000);

        let (status, _) = call(
            &app,
            Method::PUT,
            "/admin/users/0xmissing/points",
            &headers,
            Some(json!({ "points": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, overview) = call(&app, Method::GET, "/admin/overview", &headers, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(overview["total_users"], 2);
        assert_eq!(overview["users"][0]["wallet"], "0xbbbb");
        assert_eq!(overview["users"][1]["email"], "0xaaaa@example.com");

        let (status, export) = call(&app, Method::GET, "/admin/users/export", &headers, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(export.as_array().unwrap().len(), 2);
    }
}

use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE, HeaderName};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use sea_orm::DbErr;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::quests::QuestError;
use crate::referrals::ReferralError;
use crate::registration::RegistrationError;
use crate::state::AppState;
use crate::users::UserError;
use crate::visits::VisitError;

mod admin;
mod events;
mod leaderboard;
mod quests;
mod referrals;
pub mod session;
mod waitlist;

pub use session::{AdminSession, Session};

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static(session::WALLET_HEADER),
            HeaderName::from_static(session::SESSION_HEADER),
        ])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/mine", get(mine))
        .nest("/waitlist", waitlist::router())
        .nest("/quests", quests::router())
        .nest("/leaderboard", leaderboard::router())
        .nest("/referrals", referrals::router())
        .nest("/admin", admin::router())
        .nest("/events", events::router())
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "live",
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state
        .database
        .ping()
        .await
        .map_err(|err| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;

    let response = ReadyResponse {
        status: "ready",
        leaderboard_rows: state.leaderboard.current().len(),
        quest_rows: state.quests.current().len(),
        change_subscribers: state.bus.subscriber_count(),
        cache_entries: CacheSummary {
            users: state.cache.users.entry_count(),
            referral_stats: state.cache.referral_stats.entry_count(),
            sessions: state.visits.session_count(),
        },
    };
    Ok(Json(response))
}

/// Mining is announced but not live yet.
async fn mine() -> Json<MineResponse> {
    Json(MineResponse {
        status: "coming_soon",
        message: "Mining is not available yet",
    })
}

async fn not_found() -> HttpError {
    HttpError::new(StatusCode::NOT_FOUND, "Route not found".to_string())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    leaderboard_rows: usize,
    quest_rows: usize,
    change_subscribers: usize,
    cache_entries: CacheSummary,
}

#[derive(Debug, Serialize)]
struct CacheSummary {
    users: u64,
    referral_stats: u64,
    sessions: u64,
}

#[derive(Debug, Serialize)]
struct MineResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        error!("Store failure: {err}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!(status = self.status.as_u16(), "HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl From<DbErr> for HttpError {
    fn from(err: DbErr) -> Self {
        Self::internal(err)
    }
}

impl From<VisitError> for HttpError {
    fn from(err: VisitError) -> Self {
        match err {
            VisitError::InvalidSession => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<ReferralError> for HttpError {
    fn from(err: ReferralError) -> Self {
        match err {
            ReferralError::UnknownWallet(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<RegistrationError> for HttpError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::WalletNotConnected | RegistrationError::Invalid(_) => {
                Self::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            RegistrationError::Database(err) => err.into(),
            RegistrationError::Referral(err) => err.into(),
        }
    }
}

impl From<QuestError> for HttpError {
    fn from(err: QuestError) -> Self {
        let status = match err {
            QuestError::Database(err) => return err.into(),
            QuestError::Visit(err) => return err.into(),
            QuestError::NotFound(_) | QuestError::NotRegistered(_) => StatusCode::NOT_FOUND,
            QuestError::AlreadyCompleted => StatusCode::CONFLICT,
            QuestError::Inactive(_) | QuestError::LinkNotVisited | QuestError::Invalid(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<UserError> for HttpError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            UserError::Invalid(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            UserError::Database(err) => err.into(),
        }
    }
}

pub(crate) fn bad_request(message: impl Into<String>) -> HttpError {
    HttpError::new(StatusCode::BAD_REQUEST, message.into())
}

pub(crate) fn canonical_path_wallet(raw: &str) -> Result<String, HttpError> {
    crate::waitlist::canonical_wallet(raw).map_err(|err| bad_request(err.to_string()))
}

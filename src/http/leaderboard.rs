use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::models::user::{LeaderboardResponse, LeaderboardRow, UserView};
use crate::realtime::page_window;
use crate::state::AppState;
use crate::waitlist::{LeaderboardEntry, filter_leaderboard, is_admin, shorten_address};

use super::{HttpError, Session};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(leaderboard))
}

#[derive(Debug, Deserialize)]
struct LeaderboardParams {
    search: Option<String>,
    #[serde(default)]
    offset: u64,
    limit: Option<u64>,
}

/// A user together with their position in the full ranking, so ranks stay
/// stable while a search narrows the list.
struct Ranked<'a> {
    rank: u64,
    user: &'a UserView,
}

impl LeaderboardEntry for Ranked<'_> {
    fn wallet(&self) -> &str {
        &self.user.wallet
    }

    fn twitter_username(&self) -> &str {
        &self.user.twitter_username
    }
}

async fn leaderboard(
    Query(params): Query<LeaderboardParams>,
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<LeaderboardResponse>, HttpError> {
    let page_size = state.realtime.page_size;
    let limit = params.limit.unwrap_or(page_size).clamp(1, page_size);
    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string);

    let snapshot = state.leaderboard.current();
    let ranked: Vec<Ranked<'_>> = snapshot
        .iter()
        .enumerate()
        .map(|(index, user)| Ranked {
            rank: index as u64 + 1,
            user,
        })
        .collect();
    let matches = filter_leaderboard(&ranked, search.as_deref().unwrap_or(""));

    let entries: Vec<LeaderboardRow> = matches
        .iter()
        .skip(params.offset.min(usize::MAX as u64) as usize)
        .take(limit as usize)
        .map(|entry| LeaderboardRow {
            rank: entry.rank,
            wallet: entry.user.wallet.clone(),
            display_wallet: shorten_address(&entry.user.wallet),
            twitter_username: entry.user.twitter_username.clone(),
            points: entry.user.points,
            is_admin: is_admin(Some(&entry.user.wallet), &state.admin.wallet),
            is_current_user: session
                .wallet
                .as_deref()
                .is_some_and(|wallet| wallet == entry.user.wallet),
        })
        .collect();

    let window = page_window(params.offset, limit, entries.len());
    Ok(Json(LeaderboardResponse {
        total_users: snapshot.len() as u64,
        top_points: snapshot.first().map(|user| user.points).unwrap_or(0),
        search,
        offset: window.offset,
        limit: window.limit,
        has_more: window.has_more,
        next_offset: window.next_offset,
        entries,
    }))
}

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::models::referral::{
    ProcessReferralRequest, ProcessReferralResponse, ReferralCodeView, ReferralStatsView,
};
use crate::realtime::{ChangeKind, Table};
use crate::referrals::{generate_referral_code, process_referral, referral_stats};
use crate::state::AppState;
use crate::waitlist::{canonical_wallet, referral_link, wallets_match};

use super::{HttpError, Session, bad_request, canonical_path_wallet};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/process", post(process))
        .route("/{wallet}", get(stats))
        .route("/{wallet}/code", post(issue_code))
}

async fn stats(
    Path(wallet): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ReferralStatsView>, HttpError> {
    let wallet = canonical_path_wallet(&wallet)?;

    if let Some(cached) = state.cache.referral_stats.get(&wallet).await {
        return Ok(Json((*cached).clone()));
    }

    let view = referral_stats(&state.database, &wallet, &state.admin.site_url).await?;
    state
        .cache
        .referral_stats
        .insert(wallet, Arc::new(view.clone()))
        .await;
    Ok(Json(view))
}

/// Only the connected wallet may ask for its own code.
async fn issue_code(
    Path(wallet): Path<String>,
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<ReferralCodeView>, HttpError> {
    let wallet = canonical_path_wallet(&wallet)?;
    let connected = session.require_wallet()?;
    if !wallets_match(connected, &wallet) {
        return Err(HttpError::new(
            StatusCode::FORBIDDEN,
            "Referral codes can only be issued to the connected wallet".to_string(),
        ));
    }

    let code = generate_referral_code(&state.database, &wallet).await?;
    state.cache.forget_wallet(&wallet).await;
    state.bus.publish(Table::ReferralCodes, ChangeKind::Insert);

    Ok(Json(ReferralCodeView {
        link: referral_link(&state.admin.site_url, &code.code),
        code: code.code,
        uses_count: code.uses_count,
        created_at: code.created_at.timestamp(),
    }))
}

async fn process(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<ProcessReferralRequest>,
) -> Result<Json<ProcessReferralResponse>, HttpError> {
    let referred = canonical_wallet(&payload.referred_wallet)
        .map_err(|err| bad_request(err.to_string()))?;
    if !session
        .wallet
        .as_deref()
        .is_some_and(|wallet| wallet == referred)
    {
        return Err(HttpError::new(
            StatusCode::FORBIDDEN,
            "A referral can only be claimed by the referred wallet".to_string(),
        ));
    }

    let success = process_referral(
        &state.database,
        &payload.referral_code,
        &referred,
        state.rewards.referral_bonus,
    )
    .await?;
    if success {
        // The referrer is not known here, so every cached balance goes.
        state.cache.users.invalidate_all();
        state.cache.referral_stats.invalidate_all();
        state.bus.publish(Table::Referrals, ChangeKind::Insert);
        state.bus.publish(Table::Users, ChangeKind::Update);
        state.bus.publish(Table::ReferralCodes, ChangeKind::Update);
    }
    Ok(Json(ProcessReferralResponse { success }))
}

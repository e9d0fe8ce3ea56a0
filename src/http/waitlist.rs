use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::models::referral::CodeCheckResponse;
use crate::models::user::{RegisterRequest, RegisterResponse, UserView};
use crate::realtime::{ChangeKind, Table};
use crate::referrals::{CodeCheck, validate_code};
use crate::registration::{Registration, RegistrationOutcome, register};
use crate::state::AppState;
use crate::users::{find_user, user_count};
use crate::waitlist::normalize_referral_code;

use super::{HttpError, Session, canonical_path_wallet};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(join_waitlist))
        .route("/count", get(count))
        .route("/referral/{code}", get(check_referral_code))
        .route("/{wallet}", get(get_member))
}

async fn join_waitlist(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), HttpError> {
    // The body wins; the connected wallet header is the fallback.
    let wallet = payload
        .wallet_address
        .as_deref()
        .or(session.wallet.as_deref());
    let registration = Registration::parse(
        wallet,
        &payload.email,
        &payload.twitter_username,
        payload.referral_code.as_deref(),
    )?;

    let outcome = register(&state.database, &state.rewards, registration).await?;
    let response = match outcome {
        RegistrationOutcome::AlreadyRegistered(user) => {
            return Ok((
                StatusCode::OK,
                Json(RegisterResponse {
                    status: "already_registered",
                    user: UserView::from(&user),
                    referral_code: None,
                    referral: "not_provided",
                    referrer_bonus: None,
                    message: "Already registered".to_string(),
                }),
            ));
        }
        RegistrationOutcome::Registered {
            user,
            referral_code,
            referral,
        } => {
            state.bus.publish(Table::Users, ChangeKind::Insert);
            state.bus.publish(Table::ReferralCodes, ChangeKind::Insert);
            RegisterResponse {
                status: "registered",
                user: UserView::from(&user),
                referral_code: Some(referral_code.code),
                referral: referral.as_str(),
                referrer_bonus: None,
                message: "Welcome to the waitlist".to_string(),
            }
        }
        RegistrationOutcome::RegisteredWithReferral {
            user,
            referral_code,
            referrer_wallet,
            bonus,
        } => {
            state.cache.forget_wallet(&referrer_wallet).await;
            state.bus.publish(Table::Users, ChangeKind::Insert);
            state.bus.publish(Table::ReferralCodes, ChangeKind::Insert);
            state.bus.publish(Table::Referrals, ChangeKind::Insert);
            state.bus.publish(Table::Users, ChangeKind::Update);
            state.bus.publish(Table::ReferralCodes, ChangeKind::Update);
            RegisterResponse {
                status: "registered_with_referral",
                user: UserView::from(&user),
                referral_code: Some(referral_code.code),
                referral: "applied",
                referrer_bonus: Some(bonus),
                message: format!("Welcome to the waitlist. Referred by {referrer_wallet}"),
            }
        }
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: u64,
}

async fn count(State(state): State<AppState>) -> Result<Json<CountResponse>, HttpError> {
    let count = user_count(&state.database).await?;
    Ok(Json(CountResponse { count }))
}

async fn get_member(
    Path(wallet): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<UserView>, HttpError> {
    let wallet = canonical_path_wallet(&wallet)?;

    if let Some(cached) = state.cache.users.get(&wallet).await {
        return Ok(Json(UserView::from(cached.as_ref())));
    }

    let user = find_user(&state.database, &wallet).await?.ok_or_else(|| {
        HttpError::new(
            StatusCode::NOT_FOUND,
            format!("Wallet {wallet} is not on the waitlist"),
        )
    })?;
    let view = UserView::from(&user);
    state.cache.users.insert(wallet, Arc::new(user)).await;
    Ok(Json(view))
}

async fn check_referral_code(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CodeCheckResponse>, HttpError> {
    let check = validate_code(&state.database, &code).await?;
    let (valid, reason) = match check {
        CodeCheck::Valid(_) => (true, None),
        CodeCheck::Malformed => (false, Some("malformed")),
        CodeCheck::NotFound => (false, Some("not_found")),
    };
    Ok(Json(CodeCheckResponse {
        code: normalize_referral_code(&code),
        valid,
        reason,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::http::tests::{call, test_app};

    #[tokio::test]
    async fn sign_up_flow() {
        let (app, _state, _shutdown) = test_app().await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/waitlist",
            &[],
            Some(json!({
                "wallet_address": "0xAAAA",
                "email": "a@reva.xyz",
                "twitter_username": "@alice",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "registered");
        assert_eq!(body["user"]["wallet"], "0xaaaa");
        assert_eq!(body["user"]["points"], 10_000);
        let code = body["referral_code"].as_str().unwrap().to_string();

        let (_, cached) = call(&app, Method::GET, "/waitlist/0xaaaa", &[], None).await;
        assert_eq!(cached["points"], 10_000);

        let (status, body) = call(
            &app,
            Method::POST,
            "/waitlist",
            &[("x-wallet-address", "0xBBBB")],
            Some(json!({
                "email": "b@reva.xyz",
                "twitter_username": "bob",
                "ref": code.to_lowercase(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "registered_with_referral");
        assert_eq!(body["referrer_bonus"], 2_500);

        let (status, body) = call(&app, Method::GET, "/waitlist/0xAAAA", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["points"], 12_500);
        assert!(body.get("email").is_none());

        let (_, body) = call(&app, Method::GET, "/waitlist/count", &[], None).await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn repeat_sign_up_is_not_an_error() {
        let (app, _state, _shutdown) = test_app().await;
        let payload = json!({
            "wallet_address": "0xaaaa",
            "email": "a@reva.xyz",
            "twitter_username": "alice",
        });
        call(&app, Method::POST, "/waitlist", &[], Some(payload.clone())).await;
        let (status, body) = call(&app, Method::POST, "/waitlist", &[], Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "already_registered");
    }

    #[tokio::test]
    async fn missing_wallet_is_rejected() {
        let (app, _state, _shutdown) = test_app().await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/waitlist",
            &[],
            Some(json!({ "email": "a@reva.xyz", "twitter_username": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Wallet not connected");

        let (status, _) = call(&app, Method::GET, "/waitlist/0xnobody", &[], None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn referral_code_check() {
        let (app, _state, _shutdown) = test_app().await;
        let (_, body) = call(&app, Method::GET, "/waitlist/referral/ab", &[], None).await;
        assert_eq!(body["valid"], false);
        assert_eq!(body["reason"], "malformed");

        let (_, body) = call(&app, Method::GET, "/waitlist/referral/zzzzzzzz", &[], None).await;
        assert_eq!(body["code"], "ZZZZZZZZ");
        assert_eq!(body["reason"], "not_found");
    }
}

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;

use crate::state::AppState;
use crate::visits::{SessionVisits, VisitTracker};
use crate::waitlist::{canonical_wallet, is_admin};

use super::HttpError;

pub const WALLET_HEADER: &str = "x-wallet-address";
pub const SESSION_HEADER: &str = "x-session-id";

/// The connected wallet and client session a request was made from. The
/// wallet header is taken as set by the authenticating proxy in front of
/// the API; nothing here verifies ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub wallet: Option<String>,
    pub session_id: Option<String>,
}

impl Session {
    pub fn require_wallet(&self) -> Result<&str, HttpError> {
        self.wallet.as_deref().ok_or_else(|| {
            HttpError::new(StatusCode::BAD_REQUEST, "Wallet not connected".to_string())
        })
    }

    pub async fn tracker(&self, visits: &SessionVisits) -> Result<VisitTracker, HttpError> {
        let session_id = self.session_id.as_deref().ok_or_else(|| {
            HttpError::new(
                StatusCode::BAD_REQUEST,
                format!("Missing {SESSION_HEADER} header"),
            )
        })?;
        Ok(visits.tracker(session_id).await?)
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, HttpError> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|value| Some(value.trim()).filter(|value| !value.is_empty()))
            .map_err(|_| {
                HttpError::new(StatusCode::BAD_REQUEST, format!("Invalid {name} header"))
            }),
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let wallet = header_value(parts, WALLET_HEADER)?
            .map(canonical_wallet)
            .transpose()
            .map_err(|err| HttpError::new(StatusCode::BAD_REQUEST, err.to_string()))?;
        let session_id = header_value(parts, SESSION_HEADER)?.map(str::to_string);
        Ok(Self { wallet, session_id })
    }
}

/// A session whose wallet is the configured admin. Rejects with 403.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub wallet: String,
}

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        match session.wallet {
            Some(wallet) if is_admin(Some(&wallet), &state.admin.wallet) => Ok(Self { wallet }),
            _ => Err(HttpError::new(
                StatusCode::FORBIDDEN,
                "Admin wallet required".to_string(),
            )),
        }
    }
}

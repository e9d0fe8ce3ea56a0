//! Waitlist sign-up.
//!
//! A sign-up inserts the user with the starting balance, issues their own
//! referral code and, when a valid code was supplied, credits its owner.
//! All three happen in one transaction.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set, TransactionTrait};
use tracing::{info, warn};

use crate::config::RewardsConfig;
use crate::entities::{referral_code, user};
use crate::referrals::{
    CodeCheck, ReferralError, generate_referral_code, is_unique_violation, process_referral,
    validate_code,
};
use crate::users::find_user;
use crate::waitlist::{canonical_wallet, normalize_twitter_handle, validate_email};

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Wallet not connected")]
    WalletNotConnected,
    #[error("{0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Referral(#[from] ReferralError),
}

/// What happened to the referral code submitted with a sign-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferralStatus {
    NotProvided,
    Malformed,
    NotFound,
    Applied,
    /// The code exists but could not be used, e.g. it belongs to the new user.
    Rejected,
}

impl ReferralStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferralStatus::NotProvided => "not_provided",
            ReferralStatus::Malformed => "malformed",
            ReferralStatus::NotFound => "not_found",
            ReferralStatus::Applied => "applied",
            ReferralStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    AlreadyRegistered(user::Model),
    Registered {
        user: user::Model,
        referral_code: referral_code::Model,
        referral: ReferralStatus,
    },
    RegisteredWithReferral {
        user: user::Model,
        referral_code: referral_code::Model,
        referrer_wallet: String,
        bonus: i64,
    },
}

impl RegistrationOutcome {
    pub fn user(&self) -> &user::Model {
        match self {
            RegistrationOutcome::AlreadyRegistered(user)
            | RegistrationOutcome::Registered { user, .. }
            | RegistrationOutcome::RegisteredWithReferral { user, .. } => user,
        }
    }
}

/// A validated sign-up form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub wallet: String,
    pub email: String,
    pub twitter_username: String,
    pub referral_code: Option<String>,
}

impl Registration {
    pub fn parse(
        wallet: Option<&str>,
        email: &str,
        twitter_username: &str,
        referral_code: Option<&str>,
    ) -> Result<Self, RegistrationError> {
        let wallet = wallet
            .filter(|value| !value.trim().is_empty())
            .ok_or(RegistrationError::WalletNotConnected)?;
        let wallet =
            canonical_wallet(wallet).map_err(|err| RegistrationError::Invalid(err.to_string()))?;
        let email =
            validate_email(email).map_err(|err| RegistrationError::Invalid(err.to_string()))?;
        let twitter_username = normalize_twitter_handle(twitter_username)
            .map_err(|err| RegistrationError::Invalid(err.to_string()))?;
        let referral_code = referral_code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string);

        Ok(Self {
            wallet,
            email,
            twitter_username,
            referral_code,
        })
    }
}

pub async fn register(
    db: &DatabaseConnection,
    rewards: &RewardsConfig,
    registration: Registration,
) -> Result<RegistrationOutcome, RegistrationError> {
    if let Some(existing) = find_user(db, &registration.wallet).await? {
        return Ok(RegistrationOutcome::AlreadyRegistered(existing));
    }

    let code_check = match registration.referral_code.as_deref() {
        Some(raw) => Some(validate_code(db, raw).await?),
        None => None,
    };

    let txn = db.begin().await?;
    let inserted = user::ActiveModel {
        wallet: Set(registration.wallet.clone()),
        email: Set(registration.email.clone()),
        twitter_username: Set(registration.twitter_username.clone()),
        points: Set(rewards.starting_points),
        joined_at: Set(Utc::now().into()),
    }
    .insert(&txn)
    .await;

    let user = match inserted {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err) => {
            txn.rollback().await?;
            warn!(wallet = %registration.wallet, "Concurrent sign-up for the same wallet");
            let existing = find_user(db, &registration.wallet)
                .await?
                .ok_or(RegistrationError::Database(err))?;
            return Ok(RegistrationOutcome::AlreadyRegistered(existing));
        }
        Err(err) => return Err(err.into()),
    };

    let own_code = generate_referral_code(&txn, &user.wallet).await?;

    let (status, referrer) = match code_check {
        None => (ReferralStatus::NotProvided, None),
        Some(CodeCheck::Malformed) => (ReferralStatus::Malformed, None),
        Some(CodeCheck::NotFound) => (ReferralStatus::NotFound, None),
        Some(CodeCheck::Valid(code)) => {
            let applied =
                process_referral(&txn, &code.code, &user.wallet, rewards.referral_bonus).await?;
            if applied {
                (ReferralStatus::Applied, Some(code.wallet))
            } else {
                (ReferralStatus::Rejected, None)
            }
        }
    };
    txn.commit().await?;

    info!(
        wallet = %user.wallet,
        referral = status.as_str(),
        "Joined waitlist"
    );

    Ok(match referrer {
        Some(referrer_wallet) => RegistrationOutcome::RegisteredWithReferral {
            user,
            referral_code: own_code,
            referrer_wallet,
            bonus: rewards.referral_bonus,
        },
        None => RegistrationOutcome::Registered {
            user,
            referral_code: own_code,
            referral: status,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referrals::referral_stats;
    use crate::testing::memory_database;
    use crate::users::user_count;

    fn form(wallet: &str, code: Option<&str>) -> Registration {
        Registration::parse(Some(wallet), "me@reva.xyz", "@me", code).unwrap()
    }

    #[test]
    fn parse_requires_wallet() {
        assert!(matches!(
            Registration::parse(None, "me@reva.xyz", "me", None),
            Err(RegistrationError::WalletNotConnected)
        ));
        assert!(matches!(
            Registration::parse(Some("0xabc"), "nope", "me", None),
            Err(RegistrationError::Invalid(_))
        ));
        let parsed = Registration::parse(Some("0xABC"), "me@reva.xyz", "@me", Some("  ")).unwrap();
        assert_eq!(parsed.wallet, "0xabc");
        assert_eq!(parsed.twitter_username, "me");
        assert_eq!(parsed.referral_code, None);
    }

    #[tokio::test]
    async fn new_user_starts_with_bonus_and_code() {
        let db = memory_database().await;
        let rewards = RewardsConfig::default();

        let outcome = register(&db, &rewards, form("0xAAA", None)).await.unwrap();
        let RegistrationOutcome::Registered {
            user,
            referral_code,
            referral,
        } = outcome
        else {
            panic!("expected a fresh registration");
        };
        assert_eq!(user.wallet, "0xaaa");
        assert_eq!(user.points, 10_000);
        assert_eq!(referral, ReferralStatus::NotProvided);
        assert_eq!(referral_code.wallet, "0xaaa");
    }

    #[tokio::test]
    async fn second_sign_up_changes_nothing() {
        let db = memory_database().await;
        let rewards = RewardsConfig::default();

        register(&db, &rewards, form("0xaaa", None)).await.unwrap();
        let again = register(&db, &rewards, form("0xAAA", None)).await.unwrap();
        assert!(matches!(again, RegistrationOutcome::AlreadyRegistered(_)));
        assert_eq!(again.user().points, 10_000);
        assert_eq!(user_count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn valid_code_pays_referrer_only() {
        let db = memory_database().await;
        let rewards = RewardsConfig::default();

        let RegistrationOutcome::Registered { referral_code, .. } =
            register(&db, &rewards, form("0xaaa", None)).await.unwrap()
        else {
            panic!("expected a fresh registration");
        };

        let outcome = register(&db, &rewards, form("0xbbb", Some(&referral_code.code)))
            .await
            .unwrap();
        match outcome {
            RegistrationOutcome::RegisteredWithReferral {
                user,
                referrer_wallet,
                bonus,
                ..
            } => {
                assert_eq!(user.points, 10_000);
                assert_eq!(referrer_wallet, "0xaaa");
                assert_eq!(bonus, 2_500);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let referrer = find_user(&db, "0xaaa").await.unwrap().unwrap();
        assert_eq!(referrer.points, 12_500);
        let stats = referral_stats(&db, "0xaaa", "https://noxara.xyz").await.unwrap();
        assert_eq!(stats.total_referrals, 1);
    }

    #[tokio::test]
    async fn bad_codes_do_not_block_sign_up() {
        let db = memory_database().await;
        let rewards = RewardsConfig::default();

        let short = register(&db, &rewards, form("0xaaa", Some("ab"))).await.unwrap();
        assert!(matches!(
            short,
            RegistrationOutcome::Registered {
                referral: ReferralStatus::Malformed,
                ..
            }
        ));

        let unknown = register(&db, &rewards, form("0xbbb", Some("ZZZZZZZZ")))
            .await
            .unwrap();
        assert!(matches!(
            unknown,
            RegistrationOutcome::Registered {
                referral: ReferralStatus::NotFound,
                ..
            }
        ));
        assert_eq!(user_count(&db).await.unwrap(), 2);
        assert_eq!(find_user(&db, "0xaaa").await.unwrap().unwrap().points, 10_000);
    }
}

//! Invite codes and the referrer bonus.

use chrono::Utc;
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr, TransactionTrait,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::{referral, referral_code, user};
use crate::models::referral::{ReferralCodeView, ReferralStatsView, ReferralView};
use crate::waitlist::{referral_code_candidate, referral_link};

pub const REFERRAL_CODE_LEN: usize = 8;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MAX_CODE_ATTEMPTS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ReferralError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("wallet {0} is not on the waitlist")]
    UnknownWallet(String),
    #[error("no free referral code after {0} attempts")]
    CodeSpaceExhausted(usize),
}

/// Result of looking up a code typed by a visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeCheck {
    /// Too short, too long, or not alphanumeric. Never looked up.
    Malformed,
    NotFound,
    Valid(referral_code::Model),
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..REFERRAL_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub async fn find_code<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<Option<referral_code::Model>, DbErr> {
    referral_code::Entity::find()
        .filter(referral_code::Column::Code.eq(code))
        .one(conn)
        .await
}

pub async fn validate_code<C: ConnectionTrait>(conn: &C, raw: &str) -> Result<CodeCheck, DbErr> {
    let Some(code) = referral_code_candidate(raw) else {
        return Ok(CodeCheck::Malformed);
    };
    Ok(match find_code(conn, &code).await? {
        Some(model) => CodeCheck::Valid(model),
        None => CodeCheck::NotFound,
    })
}

/// Returns the wallet's code, creating it on first use.
pub async fn generate_referral_code<C: ConnectionTrait>(
    conn: &C,
    wallet: &str,
) -> Result<referral_code::Model, ReferralError> {
    if let Some(existing) = referral_code::Entity::find()
        .filter(referral_code::Column::Wallet.eq(wallet))
        .one(conn)
        .await?
    {
        return Ok(existing);
    }

    if user::Entity::find_by_id(wallet.to_string())
        .one(conn)
        .await?
        .is_none()
    {
        return Err(ReferralError::UnknownWallet(wallet.to_string()));
    }

    for attempt in 0..MAX_CODE_ATTEMPTS {
        let candidate = random_code(&mut rand::thread_rng());
        if find_code(conn, &candidate).await?.is_some() {
            debug!(attempt, "Referral code collision. Retrying");
            continue;
        }

        let model = referral_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            wallet: Set(wallet.to_string()),
            code: Set(candidate),
            uses_count: Set(0),
            created_at: Set(Utc::now().into()),
        }
        .insert(conn)
        .await?;
        info!(wallet, code = %model.code, "Referral code issued");
        return Ok(model);
    }

    Err(ReferralError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS))
}

/// Credits the owner of `code` with `bonus` points for referring
/// `referred_wallet`. Returns `false` without writing anything when the code
/// is unknown, the wallet refers itself, the referred wallet is not
/// registered, or it was already referred. Runs in its own (nested)
/// transaction so the referral row, the bonus and the use counter move
/// together.
pub async fn process_referral<C>(
    conn: &C,
    code: &str,
    referred_wallet: &str,
    bonus: i64,
) -> Result<bool, ReferralError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = conn.begin().await?;
    match apply_referral(&txn, code, referred_wallet, bonus).await {
        Ok(true) => {
            txn.commit().await?;
            Ok(true)
        }
        Ok(false) => {
            txn.rollback().await?;
            Ok(false)
        }
        Err(err) if is_unique_violation(&err) => {
            txn.rollback().await?;
            debug!(referred_wallet, "Concurrent referral lost the race");
            Ok(false)
        }
        Err(err) => {
            txn.rollback().await?;
            Err(err.into())
        }
    }
}

async fn apply_referral<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    referred_wallet: &str,
    bonus: i64,
) -> Result<bool, DbErr> {
    let Some(code) = referral_code_candidate(code) else {
        return Ok(false);
    };
    let Some(owner) = find_code(conn, &code).await? else {
        return Ok(false);
    };
    if owner.wallet == referred_wallet {
        return Ok(false);
    }
    if user::Entity::find_by_id(referred_wallet.to_string())
        .one(conn)
        .await?
        .is_none()
    {
        return Ok(false);
    }
    let already_referred = referral::Entity::find()
        .filter(referral::Column::ReferredWallet.eq(referred_wallet))
        .one(conn)
        .await?
        .is_some();
    if already_referred {
        return Ok(false);
    }

    referral::ActiveModel {
        id: Set(Uuid::new_v4()),
        referrer_wallet: Set(owner.wallet.clone()),
        referred_wallet: Set(referred_wallet.to_string()),
        referral_code: Set(owner.code.clone()),
        points_awarded: Set(bonus),
        created_at: Set(Utc::now().into()),
    }
    .insert(conn)
    .await?;

    user::Entity::update_many()
        .col_expr(
            user::Column::Points,
            Expr::col(user::Column::Points).add(bonus),
        )
        .filter(user::Column::Wallet.eq(owner.wallet.clone()))
        .exec(conn)
        .await?;

    referral_code::Entity::update_many()
        .col_expr(
            referral_code::Column::UsesCount,
            Expr::col(referral_code::Column::UsesCount).add(1),
        )
        .filter(referral_code::Column::Id.eq(owner.id))
        .exec(conn)
        .await?;

    info!(
        referrer = %owner.wallet,
        referred_wallet,
        bonus,
        "Referral applied"
    );
    Ok(true)
}

pub async fn referral_stats<C: ConnectionTrait>(
    conn: &C,
    wallet: &str,
    site_url: &str,
) -> Result<ReferralStatsView, DbErr> {
    let codes = referral_code::Entity::find()
        .filter(referral_code::Column::Wallet.eq(wallet))
        .order_by_asc(referral_code::Column::CreatedAt)
        .all(conn)
        .await?;
    let referrals = referral::Entity::find()
        .filter(referral::Column::ReferrerWallet.eq(wallet))
        .order_by_desc(referral::Column::CreatedAt)
        .all(conn)
        .await?;

    let total_points_earned = referrals.iter().map(|row| row.points_awarded).sum();
    Ok(ReferralStatsView {
        wallet: wallet.to_string(),
        codes: codes
            .into_iter()
            .map(|code| ReferralCodeView {
                link: referral_link(site_url, &code.code),
                code: code.code,
                uses_count: code.uses_count,
                created_at: code.created_at.timestamp(),
            })
            .collect(),
        total_referrals: referrals.len() as u64,
        total_points_earned,
        referrals: referrals
            .into_iter()
            .map(|row| ReferralView {
                referred_wallet: row.referred_wallet,
                referral_code: row.referral_code,
                points_awarded: row.points_awarded,
                created_at: row.created_at.timestamp(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::testing::{insert_user, memory_database};

    #[test]
    fn codes_use_unambiguous_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..64 {
            let code = random_code(&mut rng);
            assert_eq!(code.len(), REFERRAL_CODE_LEN);
            assert!(!code.contains(['0', 'O', '1', 'I']));
            assert!(referral_code_candidate(&code).is_some());
        }
    }

    #[tokio::test]
    async fn generation_is_idempotent() {
        let db = memory_database().await;
        insert_user(&db, "0xaaa", 10_000).await;

        let first = generate_referral_code(&db, "0xaaa").await.unwrap();
        let second = generate_referral_code(&db, "0xaaa").await.unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(first.uses_count, 0);
    }

    #[tokio::test]
    async fn unknown_wallet_gets_no_code() {
        let db = memory_database().await;
        assert!(matches!(
            generate_referral_code(&db, "0xnobody").await,
            Err(ReferralError::UnknownWallet(_))
        ));
    }

    #[tokio::test]
    async fn referral_credits_referrer_once() {
        let db = memory_database().await;
        insert_user(&db, "0xaaa", 10_000).await;
        insert_user(&db, "0xbbb", 10_000).await;
        let code = generate_referral_code(&db, "0xaaa").await.unwrap();

        let lowercase = code.code.to_lowercase();
        assert!(process_referral(&db, &lowercase, "0xbbb", 2_500).await.unwrap());
        assert!(!process_referral(&db, &code.code, "0xbbb", 2_500).await.unwrap());

        let referrer = user::Entity::find_by_id("0xaaa".to_string())
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(referrer.points, 12_500);
        let referred = user::Entity::find_by_id("0xbbb".to_string())
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(referred.points, 10_000);

        let code = find_code(&db, &code.code).await.unwrap().unwrap();
        assert_eq!(code.uses_count, 1);
    }

    #[tokio::test]
    async fn rejected_referrals_write_nothing() {
        let db = memory_database().await;
        insert_user(&db, "0xaaa", 10_000).await;
        let code = generate_referral_code(&db, "0xaaa").await.unwrap();

        assert!(!process_referral(&db, &code.code, "0xaaa", 2_500).await.unwrap());
        assert!(!process_referral(&db, &code.code, "0xghost", 2_500).await.unwrap());
        assert!(!process_referral(&db, "NOSUCHCODE", "0xaaa", 2_500).await.unwrap());
        assert!(!process_referral(&db, "abc", "0xaaa", 2_500).await.unwrap());

        let stats = referral_stats(&db, "0xaaa", "https://noxara.xyz").await.unwrap();
        assert_eq!(stats.total_referrals, 0);
        assert_eq!(stats.codes[0].uses_count, 0);
    }

    #[tokio::test]
    async fn stats_sum_awarded_points() {
        let db = memory_database().await;
        insert_user(&db, "0xaaa", 10_000).await;
        insert_user(&db, "0xbbb", 10_000).await;
        insert_user(&db, "0xccc", 10_000).await;
        let code = generate_referral_code(&db, "0xaaa").await.unwrap();
        process_referral(&db, &code.code, "0xbbb", 2_500).await.unwrap();
        process_referral(&db, &code.code, "0xccc", 2_500).await.unwrap();

        let stats = referral_stats(&db, "0xaaa", "https://noxara.xyz/").await.unwrap();
        assert_eq!(stats.total_referrals, 2);
        assert_eq!(stats.total_points_earned, 5_000);
        assert_eq!(
            stats.codes[0].link,
            format!("https://noxara.xyz?ref={}", code.code)
        );
        assert_eq!(stats.codes[0].uses_count, 2);
    }

    #[tokio::test]
    async fn validate_code_classifies_input() {
        let db = memory_database().await;
        insert_user(&db, "0xaaa", 10_000).await;
        let code = generate_referral_code(&db, "0xaaa").await.unwrap();

        assert_eq!(validate_code(&db, "ab").await.unwrap(), CodeCheck::Malformed);
        assert_eq!(
            validate_code(&db, "ZZZZZZZZ").await.unwrap(),
            CodeCheck::NotFound
        );
        assert!(matches!(
            validate_code(&db, &code.code.to_lowercase()).await.unwrap(),
            CodeCheck::Valid(found) if found.wallet == "0xaaa"
        ));
    }
}

use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Select,
};
use sea_orm::sea_query::Expr;
use tracing::info;

use crate::entities::user;
use crate::waitlist::parse_points;

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("wallet {0} is not on the waitlist")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
}

pub async fn find_user<C: ConnectionTrait>(
    conn: &C,
    wallet: &str,
) -> Result<Option<user::Model>, DbErr> {
    user::Entity::find_by_id(wallet.to_string()).one(conn).await
}

pub async fn user_count<C: ConnectionTrait>(conn: &C) -> Result<u64, DbErr> {
    user::Entity::find().count(conn).await
}

/// Points descending; ties go to whoever joined first.
fn in_rank_order() -> Select<user::Entity> {
    user::Entity::find()
        .order_by_desc(user::Column::Points)
        .order_by_asc(user::Column::JoinedAt)
        .order_by_asc(user::Column::Wallet)
}

pub async fn ranked_users<C: ConnectionTrait>(conn: &C) -> Result<Vec<user::Model>, DbErr> {
    in_rank_order().all(conn).await
}

/// One page of the ranking, for the admin table.
pub async fn users_page<C: ConnectionTrait>(
    conn: &C,
    offset: u64,
    limit: u64,
) -> Result<Vec<user::Model>, DbErr> {
    in_rank_order()
        .offset(offset)
        .limit(limit)
        .all(conn)
        .await
}

/// Overwrites a balance with a value typed by the admin.
pub async fn set_points<C: ConnectionTrait>(
    conn: &C,
    wallet: &str,
    raw_points: &str,
) -> Result<user::Model, UserError> {
    let points = parse_points(raw_points).map_err(|err| UserError::Invalid(err.to_string()))?;

    let result = user::Entity::update_many()
        .col_expr(user::Column::Points, Expr::value(points))
        .filter(user::Column::Wallet.eq(wallet))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(UserError::NotFound(wallet.to_string()));
    }
    info!(wallet, points, "Points overwritten by admin");

    find_user(conn, wallet)
        .await?
        .ok_or_else(|| UserError::NotFound(wallet.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{insert_user, memory_database};

    #[tokio::test]
    async fn ranking_orders_by_points() {
        let db = memory_database().await;
        insert_user(&db, "0xlow", 100).await;
        insert_user(&db, "0xhigh", 900).await;
        insert_user(&db, "0xmid", 500).await;

        let wallets: Vec<String> = ranked_users(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|user| user.wallet)
            .collect();
        assert_eq!(wallets, vec!["0xhigh", "0xmid", "0xlow"]);
        assert_eq!(user_count(&db).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn pages_follow_the_ranking() {
        let db = memory_database().await;
        let pause = || tokio::time::sleep(std::time::Duration::from_millis(5));
        insert_user(&db, "0xearly", 500).await;
        pause().await;
        insert_user(&db, "0xrich", 900).await;
        pause().await;
        insert_user(&db, "0xpoor", 1).await;
        pause().await;
        insert_user(&db, "0xlate", 500).await;

        let wallets = |page: Vec<user::Model>| -> Vec<String> {
            page.into_iter().map(|user| user.wallet).collect()
        };
        assert_eq!(
            wallets(users_page(&db, 0, 2).await.unwrap()),
            vec!["0xrich", "0xearly"]
        );
        assert_eq!(
            wallets(users_page(&db, 2, 2).await.unwrap()),
            vec!["0xlate", "0xpoor"]
        );
    }

    #[tokio::test]
    async fn admin_points_edit_is_strict() {
        let db = memory_database().await;
        insert_user(&db, "0xaaa", 10_000).await;
        insert_user(&db, "0xbbb", 10_000).await;

        let updated = set_points(&db, "0xaaa", " 42 ").await.unwrap();
        assert_eq!(updated.points, 42);
        assert_eq!(find_user(&db, "0xbbb").await.unwrap().unwrap().points, 10_000);

        assert!(matches!(
            set_points(&db, "0xaaa", "12abc").await,
            Err(UserError::Invalid(_))
        ));
        assert_eq!(find_user(&db, "0xaaa").await.unwrap().unwrap().points, 42);

        assert!(matches!(
            set_points(&db, "0xmissing", "5").await,
            Err(UserError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn pages_are_bounded() {
        let db = memory_database().await;
        for index in 0..5 {
            insert_user(&db, &format!("0x{index}"), 0).await;
        }
        assert_eq!(users_page(&db, 0, 3).await.unwrap().len(), 3);
        assert_eq!(users_page(&db, 3, 3).await.unwrap().len(), 2);
    }
}

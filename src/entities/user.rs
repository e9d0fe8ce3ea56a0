//! Waitlist member keyed by lowercase wallet address.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub wallet: String,
    pub email: String,
    pub twitter_username: String,
    pub points: i64,
    pub joined_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::completed_quest::Entity")]
    CompletedQuest,
    #[sea_orm(has_one = "super::referral_code::Entity")]
    ReferralCode,
}

impl Related<super::completed_quest::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CompletedQuest.def()
    }
}

impl Related<super::referral_code::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReferralCode.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

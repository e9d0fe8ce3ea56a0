use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub quest_id: Uuid,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub reward_points: i64,
    /// `active` or `inactive`
    pub status: String,
    pub quest_link: Option<String>,
    pub created_by: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::completed_quest::Entity")]
    CompletedQuest,
}

impl Related<super::completed_quest::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CompletedQuest.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

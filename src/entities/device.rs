use chrono::{DateTime, Utc};
use sea_orm::{entity::prelude::*, ActiveValue::Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Custody status of a physical handset.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum DeviceStatus {
    #[sea_orm(string_value = "NEW")]
    New,
    #[sea_orm(string_value = "ASSIGNED")]
    Assigned,
    #[sea_orm(string_value = "USED")]
    Used,
    #[sea_orm(string_value = "REPAIRED")]
    Repaired,
    #[sea_orm(string_value = "NOT_REPAIRED")]
    NotRepaired,
    #[sea_orm(string_value = "LOST")]
    Lost,
}

impl DeviceStatus {
    /// Statuses a device may be handed out from.
    pub fn is_assignable(self) -> bool {
        matches!(self, Self::New | Self::Used | Self::Repaired)
    }

    /// Statuses a closed assignment may leave its device in.
    pub fn is_closure_outcome(self) -> bool {
        matches!(
            self,
            Self::Used | Self::Repaired | Self::NotRepaired | Self::Lost
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub imei: String,
    pub model: Option<String>,
    pub status: DeviceStatus,
    /// Denormalised assignee name; non-null iff `status` is `ASSIGNED`.
    pub assigned_to: Option<String>,
    pub ticket: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::assignment::Entity")]
    Assignments,
}

impl Related<super::assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assignments.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
        }
        active_model.updated_at = Set(now);

        Ok(active_model)
    }
}

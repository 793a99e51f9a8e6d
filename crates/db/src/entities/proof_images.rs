//! `SeaORM` Entity for proof_images table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "proof_images")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub refund_id: Uuid,
    pub payment_entry_id: Option<Uuid>,
    pub position: i32,
    pub file_name: String,
    pub mime_type: String,
    pub byte_size: i64,
    #[sea_orm(column_type = "VarBinary(StringLen::None)")]
    pub data: Vec<u8>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::refunds::Entity",
        from = "Column::RefundId",
        to = "super::refunds::Column::Id",
        on_delete = "Cascade"
    )]
    Refunds,
    #[sea_orm(
        belongs_to = "super::refund_payments::Entity",
        from = "Column::PaymentEntryId",
        to = "super::refund_payments::Column::Id",
        on_delete = "Cascade"
    )]
    RefundPayments,
}

impl Related<super::refunds::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Refunds.def()
    }
}

impl Related<super::refund_payments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RefundPayments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! `SeaORM` Entity for refund_payments table.

use super::sea_orm_active_enums::RefundMethod;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "refund_payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub refund_id: Uuid,
    pub transaction_date: Date,
    pub payment_method: RefundMethod,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub paid_amount: Decimal,
    pub utr_number: Option<String>,
    pub upi_id: Option<String>,
    pub impc_number: Option<String>,
    pub check_dtpf: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub recorded_by: Uuid,
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
    #[sea_orm(has_many = "super::proof_images::Entity")]
    ProofImages,
}

impl Related<super::refunds::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Refunds.def()
    }
}

impl Related<super::proof_images::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProofImages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! `SeaORM` Entity for refunds table.

use super::sea_orm_active_enums::{RefundMethod, RefundStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "refunds")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub return_request_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub refund_amount: Decimal,
    pub refund_method: RefundMethod,
    pub status: RefundStatus,
    pub payment_reference: Option<String>,
    pub completion_utr_number: Option<String>,
    pub completion_upi_id: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub completion_notes: Option<String>,
    pub completed_by: Option<Uuid>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub failed_by: Option<Uuid>,
    pub failed_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text", nullable)]
    pub failure_reason: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::return_requests::Entity",
        from = "Column::ReturnRequestId",
        to = "super::return_requests::Column::Id"
    )]
    ReturnRequests,
    #[sea_orm(has_many = "super::refund_payments::Entity")]
    RefundPayments,
    #[sea_orm(has_many = "super::proof_images::Entity")]
    ProofImages,
}

impl Related<super::return_requests::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReturnRequests.def()
    }
}

impl Related<super::refund_payments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RefundPayments.def()
    }
}

impl Related<super::proof_images::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProofImages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

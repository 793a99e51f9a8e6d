//! `SeaORM` Entity definitions.

pub mod prelude;

pub mod proof_images;
pub mod refund_payments;
pub mod refunds;
pub mod return_requests;
pub mod sea_orm_active_enums;

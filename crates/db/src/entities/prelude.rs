//! `SeaORM` Entity prelude.

pub use super::proof_images::Entity as ProofImages;
pub use super::refund_payments::Entity as RefundPayments;
pub use super::refunds::Entity as Refunds;
pub use super::return_requests::Entity as ReturnRequests;

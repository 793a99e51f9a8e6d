//! Database seeder for Tally development and testing.
//!
//! The return-request workflow lives in another service; the refund ledger
//! only keeps the slice it reads. This seeds a handful of return requests
//! with fixed IDs so refunds can be opened against them locally.
//!
//! Usage: cargo run --bin seeder

use std::str::FromStr;

use anyhow::Context;
use rust_decimal::Decimal;
use uuid::Uuid;

use tally_core::refund::{ReturnRequest, ReturnRequestStatus};
use tally_db::PgRefundStore;
use tally_shared::{
    AppConfig,
    types::{Amount, ReturnRequestId},
};

/// Fixed return requests: (id, total, status).
const RETURN_REQUESTS: &[(&str, &str, ReturnRequestStatus)] = &[
    (
        "00000000-0000-0000-0000-000000000101",
        "10000.00",
        ReturnRequestStatus::Approved,
    ),
    (
        "00000000-0000-0000-0000-000000000102",
        "500.00",
        ReturnRequestStatus::Approved,
    ),
    (
        "00000000-0000-0000-0000-000000000103",
        "2499.50",
        ReturnRequestStatus::Approved,
    ),
    (
        "00000000-0000-0000-0000-000000000104",
        "1200.00",
        ReturnRequestStatus::Pending,
    ),
    (
        "00000000-0000-0000-0000-000000000105",
        "800.00",
        ReturnRequestStatus::Rejected,
    ),
];

fn database_url() -> anyhow::Result<String> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(url);
    }
    let config = AppConfig::load().context("Failed to load configuration")?;
    Ok(config.database_url()?.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    println!("Connecting to database...");
    let db = tally_db::connect(&database_url()?).await?;
    let store = PgRefundStore::new(db);

    println!("Seeding return requests...");
    for (id, total, status) in RETURN_REQUESTS {
        let return_request = ReturnRequest {
            id: ReturnRequestId::from_uuid(Uuid::parse_str(id)?),
            total_return_amount: Amount::new(Decimal::from_str(total)?)?,
            status: *status,
        };
        store
            .upsert_return_request(&return_request)
            .await
            .with_context(|| format!("Failed to seed return request {id}"))?;
        println!("  {id}: {total} ({status})");
    }

    println!("Seeding complete!");
    Ok(())
}

//! Refund ledger migration.
//!
//! Creates the return request mirror, refunds, payment entries and proof
//! images, plus the constraints and triggers that back the ledger invariants
//! at the database level.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: ENUMS
        // ============================================================
        db.execute_unprepared(ENUMS_SQL).await?;

        // ============================================================
        // PART 2: TABLES
        // ============================================================
        db.execute_unprepared(RETURN_REQUESTS_SQL).await?;
        db.execute_unprepared(REFUNDS_SQL).await?;
        db.execute_unprepared(REFUND_PAYMENTS_SQL).await?;
        db.execute_unprepared(PROOF_IMAGES_SQL).await?;

        // ============================================================
        // PART 3: TRIGGERS
        // ============================================================
        db.execute_unprepared(TRIGGERS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

// ============================================================
// SQL CONSTANTS
// ============================================================

const ENUMS_SQL: &str = r"
CREATE TYPE refund_method AS ENUM ('cash', 'upi', 'bank_transfer', 'cheque');
CREATE TYPE refund_status AS ENUM ('pending', 'processing', 'failed', 'completed');
CREATE TYPE return_request_status AS ENUM ('pending', 'approved', 'rejected');
";

const RETURN_REQUESTS_SQL: &str = r"
-- Read-only mirror of the upstream returns workflow
CREATE TABLE return_requests (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    total_return_amount NUMERIC(19, 2) NOT NULL,
    status return_request_status NOT NULL DEFAULT 'pending',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_return_total_non_negative CHECK (total_return_amount >= 0)
);
";

const REFUNDS_SQL: &str = r"
CREATE TABLE refunds (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    return_request_id UUID NOT NULL REFERENCES return_requests(id),
    refund_amount NUMERIC(19, 2) NOT NULL,
    refund_method refund_method NOT NULL,
    status refund_status NOT NULL DEFAULT 'pending',
    payment_reference VARCHAR(255),

    -- Completion evidence (refund level)
    completion_utr_number VARCHAR(100),
    completion_upi_id VARCHAR(255),
    completion_notes TEXT,
    completed_by UUID,
    completed_at TIMESTAMPTZ,

    -- Failure override
    failed_by UUID,
    failed_at TIMESTAMPTZ,
    failure_reason TEXT,

    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT chk_refund_amount_positive CHECK (refund_amount > 0),
    CONSTRAINT chk_completion_recorded CHECK (
        status <> 'completed' OR (completed_by IS NOT NULL AND completed_at IS NOT NULL)
    ),
    CONSTRAINT chk_failure_recorded CHECK (
        status <> 'failed' OR (failed_by IS NOT NULL AND failed_at IS NOT NULL AND failure_reason IS NOT NULL)
    )
);

-- At most one refund per return request that has not failed
CREATE UNIQUE INDEX uq_refunds_live_return_request ON refunds(return_request_id) WHERE status <> 'failed';

CREATE INDEX idx_refunds_created ON refunds(created_at DESC, id DESC);
CREATE INDEX idx_refunds_status ON refunds(status);
CREATE INDEX idx_refunds_method ON refunds(refund_method);
";

const REFUND_PAYMENTS_SQL: &str = r"
CREATE TABLE refund_payments (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    refund_id UUID NOT NULL REFERENCES refunds(id) ON DELETE CASCADE,
    transaction_date DATE NOT NULL,
    payment_method refund_method NOT NULL,
    paid_amount NUMERIC(19, 2) NOT NULL,
    utr_number VARCHAR(100),
    upi_id VARCHAR(255),
    impc_number VARCHAR(100),
    check_dtpf VARCHAR(100),
    notes TEXT,
    recorded_by UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT chk_paid_amount_positive CHECK (paid_amount > 0)
);

CREATE INDEX idx_refund_payments_refund ON refund_payments(refund_id, created_at, id);
";

const PROOF_IMAGES_SQL: &str = r"
-- Owned by a payment entry, or by a refund's completion evidence when payment_entry_id is NULL
CREATE TABLE proof_images (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    refund_id UUID NOT NULL REFERENCES refunds(id) ON DELETE CASCADE,
    payment_entry_id UUID REFERENCES refund_payments(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    file_name VARCHAR(255) NOT NULL,
    mime_type VARCHAR(100) NOT NULL,
    byte_size BIGINT NOT NULL,
    data BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT chk_proof_size CHECK (byte_size > 0 AND octet_length(data) = byte_size)
);

CREATE INDEX idx_proof_images_payment ON proof_images(payment_entry_id, position);
CREATE INDEX idx_proof_images_completion ON proof_images(refund_id, position) WHERE payment_entry_id IS NULL;
";

const TRIGGERS_SQL: &str = r"
-- ============================================================
-- FUNCTION: prevent_overpayment
-- Last line of defense for paid <= refund_amount
-- ============================================================
CREATE OR REPLACE FUNCTION prevent_overpayment()
RETURNS TRIGGER AS $$
DECLARE
    owed NUMERIC(19, 2);
    refund_state refund_status;
    paid NUMERIC(19, 2);
BEGIN
    SELECT r.refund_amount, r.status INTO owed, refund_state
    FROM refunds r
    WHERE r.id = NEW.refund_id
    FOR UPDATE;

    IF refund_state IN ('completed', 'failed') THEN
        RAISE EXCEPTION 'Cannot add payment to % refund', refund_state;
    END IF;

    SELECT COALESCE(SUM(paid_amount), 0) INTO paid
    FROM refund_payments
    WHERE refund_id = NEW.refund_id;

    IF paid + NEW.paid_amount > owed THEN
        RAISE EXCEPTION 'Payment of % exceeds remaining amount %', NEW.paid_amount, owed - paid;
    END IF;

    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_prevent_overpayment
BEFORE INSERT ON refund_payments
FOR EACH ROW
EXECUTE FUNCTION prevent_overpayment();

-- ============================================================
-- FUNCTION: prevent_closed_refund_modification
-- Completed and failed refunds are immutable
-- ============================================================
CREATE OR REPLACE FUNCTION prevent_closed_refund_modification()
RETURNS TRIGGER AS $$
BEGIN
    IF OLD.status IN ('completed', 'failed') THEN
        RAISE EXCEPTION 'Cannot modify % refund', OLD.status;
    END IF;

    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_prevent_closed_refund_mod
BEFORE UPDATE ON refunds
FOR EACH ROW
EXECUTE FUNCTION prevent_closed_refund_modification();

-- ============================================================
-- FUNCTION: prevent_closed_ledger_change
-- Payments and proofs of completed and failed refunds are frozen
-- ============================================================
CREATE OR REPLACE FUNCTION prevent_closed_ledger_change()
RETURNS TRIGGER AS $$
DECLARE
    target UUID;
    refund_state refund_status;
BEGIN
    IF TG_OP = 'DELETE' THEN
        target := OLD.refund_id;
    ELSE
        target := NEW.refund_id;
    END IF;

    SELECT r.status INTO refund_state
    FROM refunds r
    WHERE r.id = target;

    IF refund_state IN ('completed', 'failed') THEN
        RAISE EXCEPTION 'Cannot change ledger of % refund', refund_state;
    END IF;

    IF TG_OP = 'DELETE' THEN
        RETURN OLD;
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_prevent_closed_payment_delete
BEFORE DELETE ON refund_payments
FOR EACH ROW
EXECUTE FUNCTION prevent_closed_ledger_change();

CREATE TRIGGER trg_prevent_closed_proof_insert
BEFORE INSERT ON proof_images
FOR EACH ROW
EXECUTE FUNCTION prevent_closed_ledger_change();
";

const DROP_ALL_SQL: &str = r"
DROP TABLE IF EXISTS proof_images CASCADE;
DROP TABLE IF EXISTS refund_payments CASCADE;
DROP TABLE IF EXISTS refunds CASCADE;
DROP TABLE IF EXISTS return_requests CASCADE;
DROP FUNCTION IF EXISTS prevent_overpayment() CASCADE;
DROP FUNCTION IF EXISTS prevent_closed_refund_modification() CASCADE;
DROP FUNCTION IF EXISTS prevent_closed_ledger_change() CASCADE;
DROP TYPE IF EXISTS return_request_status;
DROP TYPE IF EXISTS refund_status;
DROP TYPE IF EXISTS refund_method;
";

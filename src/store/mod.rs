pub mod memory;
pub mod mongo;

use crate::core::rollup::ReadingContribution;
use crate::errors::AppError;
use crate::models::{
    CounterDevice, CounterReading, CounterSnapshot, DailySummary, HourlySummary, Machine, Product,
    ProductionRun,
};
use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};

/// Storage capability for the counter core. MongoDB in production,
/// in-memory for tests.
#[async_trait]
pub trait CounterStore: Send + Sync {
    // Reference lookups (read-only data managed by the plant webapp).
    // Identifiers are an ObjectId in hex or a human-readable code; only
    // active entities resolve.
    async fn resolve_device(&self, identifier: &str) -> Result<Option<CounterDevice>, AppError>;
    async fn resolve_product(&self, identifier: &str) -> Result<Option<Product>, AppError>;
    async fn find_device(&self, id: ObjectId) -> Result<Option<CounterDevice>, AppError>;
    async fn find_machine(&self, id: ObjectId) -> Result<Option<Machine>, AppError>;

    /// The single Active run of a device. More than one Active run means
    /// the core invariant is broken; that is surfaced as an Internal
    /// error, never silently repaired.
    async fn find_active_run(&self, device_id: ObjectId) -> Result<Option<ProductionRun>, AppError>;
    async fn insert_run(&self, run: &ProductionRun) -> Result<(), AppError>;
    /// Guarded by the run's version stamp. A version mismatch (another
    /// writer got there first) fails with Conflict and is retried by the
    /// orchestrator.
    async fn update_run(&self, run: &ProductionRun) -> Result<(), AppError>;

    // Rollup upserts, keyed by (device, date[, hour]). One row per key.
    async fn upsert_hourly(
        &self,
        device_id: ObjectId,
        product_id: Option<ObjectId>,
        date: &str,
        hour: i32,
        contribution: &ReadingContribution,
    ) -> Result<(), AppError>;
    async fn upsert_daily(
        &self,
        device_id: ObjectId,
        product_id: Option<ObjectId>,
        date: &str,
        contribution: &ReadingContribution,
    ) -> Result<(), AppError>;

    /// Append to the reading ledger. Records are never updated.
    async fn insert_reading(&self, reading: &CounterReading) -> Result<(), AppError>;

    // Dashboard queries.
    async fn runs_for_device(
        &self,
        device_id: ObjectId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ProductionRun>, AppError>;
    async fn readings_for_run(
        &self,
        run_id: ObjectId,
        limit: i64,
    ) -> Result<Vec<CounterReading>, AppError>;
    async fn readings_since(
        &self,
        device_id: ObjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<CounterReading>, AppError>;
    async fn hourly_range(
        &self,
        device_id: ObjectId,
        from_date: &str,
        to_date: &str,
    ) -> Result<Vec<HourlySummary>, AppError>;
    async fn daily_range(
        &self,
        device_id: ObjectId,
        from_date: &str,
        to_date: &str,
    ) -> Result<Vec<DailySummary>, AppError>;

    // Legacy OK/NOK snapshot log.
    async fn last_snapshot(&self, machine_id: ObjectId)
        -> Result<Option<CounterSnapshot>, AppError>;
    async fn insert_snapshot(&self, snapshot: &CounterSnapshot) -> Result<(), AppError>;
    async fn recent_snapshots(&self, limit: i64) -> Result<Vec<CounterSnapshot>, AppError>;
}

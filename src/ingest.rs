//! Ingestion orchestrator. One reading comes in, the run state machine
//! advances, both rollup buckets absorb the reading, and the ledger gets
//! its record. All of it happens under the device's lock so two retried
//! requests for the same device cannot both open a run.

use crate::core::classify::{classify_channels, ReadingKind};
use crate::core::rollup::{bucket_date, bucket_hour, ReadingContribution};
use crate::core::run::advance;
use crate::errors::{AppError, ErrorType};
use crate::models::{CounterReading, CounterSnapshot};
use crate::store::CounterStore;
use crate::utils::utils_functions::{parse_object_id, round2};
use crate::utils::utils_models::{ReadingResponse, SnapshotResponse};
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// How often the read-modify-write is retried after a version conflict
/// before the failure is surfaced as transient.
const MAX_RUN_RETRIES: u32 = 3;

/// One async mutex per device id. Ingestions for the same device are
/// serialized; different devices never contend.
#[derive(Default)]
pub struct DeviceLocks {
    locks: Mutex<HashMap<ObjectId, Arc<Mutex<()>>>>,
}

impl DeviceLocks {
    pub fn new() -> DeviceLocks {
        DeviceLocks::default()
    }

    async fn acquire(&self, device_id: ObjectId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(device_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub async fn ingest_reading(
    store: &dyn CounterStore,
    locks: &DeviceLocks,
    noise_threshold: i64,
    device_identifier: &str,
    product_identifier: &str,
    value: i64,
) -> Result<ReadingResponse, AppError> {
    // Validation happens before any mutation; a rejected reading leaves
    // no trace.
    if value < 0 {
        return Err(AppError::new(
            "counter value must not be negative",
            ErrorType::BadRequest,
        ));
    }

    let device = store.resolve_device(device_identifier).await?.ok_or_else(|| {
        AppError::new(
            format!(
                "device '{}' was not found or is inactive",
                device_identifier
            )
            .as_str(),
            ErrorType::BadRequest,
        )
    })?;

    let product = store
        .resolve_product(product_identifier)
        .await?
        .ok_or_else(|| {
            AppError::new(
                format!(
                    "product '{}' was not found or is inactive",
                    product_identifier
                )
                .as_str(),
                ErrorType::BadRequest,
            )
        })?;

    // One timestamp for the whole unit of work.
    let now = Utc::now();

    let lock = locks.acquire(device.id).await;
    let _guard = lock.lock().await;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match process_reading(store, device.id, product.id, value, now, noise_threshold).await {
            Err(err) if err.err_type == ErrorType::Conflict && attempt < MAX_RUN_RETRIES => {
                log::warn!(
                    "conflict on device {} (attempt {}), retrying",
                    device.id,
                    attempt
                );
            }
            other => return other,
        }
    }
}

async fn process_reading(
    store: &dyn CounterStore,
    device_id: ObjectId,
    product_id: ObjectId,
    value: i64,
    now: DateTime<Utc>,
    noise_threshold: i64,
) -> Result<ReadingResponse, AppError> {
    let active = store.find_active_run(device_id).await?;
    let transition = advance(active, device_id, Some(product_id), value, now, noise_threshold);

    if let Some(closed) = &transition.closed {
        store.update_run(closed).await?;
        log::info!(
            "run {} closed on product change, total {} over {} readings",
            closed.id,
            closed.production_total,
            closed.reading_count
        );
    }

    if transition.was_created {
        store.insert_run(&transition.run).await?;
        log::info!(
            "run {} opened for device {}, baseline {}",
            transition.run.id,
            device_id,
            value
        );
    } else {
        store.update_run(&transition.run).await?;
    }

    let is_reset = transition.classification.kind == ReadingKind::Reset;
    let is_noise = transition.classification.kind == ReadingKind::Noise;
    if is_reset {
        log::info!(
            "reset detected on device {}: {:?} -> {}",
            device_id,
            transition.previous_value,
            value
        );
    }

    let contribution = ReadingContribution {
        value,
        increment: transition.classification.increment,
        is_reset,
        run_started: transition.was_created,
        run_closed: transition.was_replaced,
    };
    let date = bucket_date(now);
    let hour = bucket_hour(now);

    store
        .upsert_hourly(device_id, Some(product_id), &date, hour, &contribution)
        .await?;
    store
        .upsert_daily(device_id, Some(product_id), &date, &contribution)
        .await?;

    // Ledger last, recording exactly what was applied.
    let reading = CounterReading {
        id: ObjectId::new(),
        run_id: transition.run.id,
        device_id,
        product_id: Some(product_id),
        value,
        previous_value: transition.previous_value,
        delta: transition.classification.delta,
        increment: transition.classification.increment,
        is_reset,
        is_noise,
        timestamp: bson::DateTime::from_chrono(now),
    };
    store.insert_reading(&reading).await?;

    let message = if transition.was_replaced {
        "reading recorded (run closed, new run started)"
    } else if transition.was_created {
        "reading recorded (new run)"
    } else if is_reset {
        "reading recorded (reset detected)"
    } else if is_noise {
        "reading recorded (noise ignored)"
    } else {
        "reading recorded"
    };

    Ok(ReadingResponse {
        success: true,
        message: message.to_string(),
        reading_id: Some(reading.id.to_hex()),
        run_id: Some(transition.run.id.to_hex()),
        increment: transition.classification.increment,
        run_total: transition.run.production_total,
        is_reset,
        is_noise,
        run_created: transition.was_created,
        run_replaced: transition.was_replaced,
    })
}

/// Legacy dual-counter ingestion: one raw OK/NOK snapshot per machine,
/// appended as-is. Increments are computed channel-wise against the
/// previous snapshot with noise handling disabled; no run is tracked.
pub async fn ingest_snapshot(
    store: &dyn CounterStore,
    machine_identifier: &str,
    ok: i64,
    nok: i64,
    model_identifier: &Option<String>,
) -> Result<SnapshotResponse, AppError> {
    if ok < 0 || nok < 0 {
        return Err(AppError::new(
            "counters must not be negative",
            ErrorType::BadRequest,
        ));
    }

    let machine_id = parse_object_id(machine_identifier, "machine")?;
    let machine = store.find_machine(machine_id).await?.ok_or_else(|| {
        AppError::new(
            format!(
                "machine '{}' was not found or is inactive",
                machine_identifier
            )
            .as_str(),
            ErrorType::BadRequest,
        )
    })?;

    let model_id = match model_identifier {
        Some(raw) => Some(parse_object_id(raw, "model")?),
        None => None,
    };

    let previous = store.last_snapshot(machine.id).await?;
    let previous_channels = previous.as_ref().map(|s| [s.ok_value, s.nok_value]);
    let channels = classify_channels(
        previous_channels.as_ref().map(|c| c.as_slice()),
        &[ok, nok],
        0,
    );

    let snapshot = CounterSnapshot {
        id: ObjectId::new(),
        machine_id: machine.id,
        ok_value: ok,
        nok_value: nok,
        model_id,
        ok_increment: channels[0].increment,
        nok_increment: channels[1].increment,
        timestamp: bson::DateTime::from_chrono(Utc::now()),
    };
    store.insert_snapshot(&snapshot).await?;

    log::info!(
        "snapshot {} recorded for machine {}: OK={} (+{}), NOK={} (+{})",
        snapshot.id,
        machine.id,
        ok,
        snapshot.ok_increment,
        nok,
        snapshot.nok_increment
    );

    Ok(SnapshotResponse {
        success: true,
        message: "snapshot recorded".to_string(),
        snapshot_id: Some(snapshot.id.to_hex()),
        total_units: snapshot.total_units(),
        quality_percent: round2(snapshot.quality_percent()),
        defect_percent: round2(snapshot.defect_percent()),
        ok_increment: snapshot.ok_increment,
        nok_increment: snapshot.nok_increment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CounterDevice, Machine, Product, ProductionRun, RunState};
    use crate::store::memory::MemoryStore;

    const THRESHOLD: i64 = 5;

    struct Fixture {
        store: Arc<MemoryStore>,
        locks: Arc<DeviceLocks>,
        device: CounterDevice,
        machine: Machine,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let machine = Machine {
            id: ObjectId::new(),
            name: "Press 7".to_string(),
            active: true,
        };
        let device = CounterDevice {
            id: ObjectId::new(),
            machine_id: machine.id,
            name: "Main counter".to_string(),
            code: "CNT-07".to_string(),
            counter_type: "Production".to_string(),
            active: true,
            created_at: bson::DateTime::now(),
        };
        let product_a = Product {
            id: ObjectId::new(),
            name: "Widget A".to_string(),
            code: Some("P-100".to_string()),
            active: true,
        };
        let product_b = Product {
            id: ObjectId::new(),
            name: "Widget B".to_string(),
            code: Some("P-200".to_string()),
            active: true,
        };

        store.add_machine(machine.clone()).await;
        store.add_device(device.clone()).await;
        store.add_product(product_a).await;
        store.add_product(product_b).await;

        Fixture {
            store,
            locks: Arc::new(DeviceLocks::new()),
            device,
            machine,
        }
    }

    async fn ingest(f: &Fixture, product_code: &str, value: i64) -> ReadingResponse {
        ingest_reading(
            f.store.as_ref(),
            &f.locks,
            THRESHOLD,
            "CNT-07",
            product_code,
            value,
        )
        .await
        .expect("ingestion failed")
    }

    #[tokio::test]
    async fn full_run_lifecycle() {
        let f = fixture().await;

        // Scenario A: first reading opens a run, attributes nothing.
        let a = ingest(&f, "P-100", 100).await;
        assert!(a.run_created);
        assert!(!a.run_replaced);
        assert_eq!(a.increment, 0);
        assert_eq!(a.run_total, 0);

        // Scenario B: forward reading counts.
        let b = ingest(&f, "P-100", 150).await;
        assert_eq!(b.increment, 50);
        assert_eq!(b.run_total, 50);
        assert!(!b.is_reset);

        // Scenario C: small dip is noise, total untouched.
        let c = ingest(&f, "P-100", 148).await;
        assert!(c.is_noise);
        assert_eq!(c.increment, 0);
        assert_eq!(c.run_total, 50);
        let active = f.store.find_active_run(f.device.id).await.unwrap().unwrap();
        assert_eq!(active.last_value, 148);
        assert_eq!(active.final_value, 150);

        // Scenario D: big drop is a reset.
        let d = ingest(&f, "P-100", 10).await;
        assert!(d.is_reset);
        assert_eq!(d.increment, 0);
        assert_eq!(d.run_total, 50);
        let active = f.store.find_active_run(f.device.id).await.unwrap().unwrap();
        assert_eq!(active.reset_count, 1);

        // Scenario E: product change closes the run and opens a new one.
        let old_run_id = ObjectId::parse_str(d.run_id.as_deref().unwrap()).unwrap();
        let e = ingest(&f, "P-200", 400).await;
        assert!(e.run_created);
        assert!(e.run_replaced);
        assert_eq!(e.run_total, 0);
        assert_ne!(e.run_id, d.run_id);

        let runs = f
            .store
            .runs_for_device(f.device.id, None, None, 50)
            .await
            .unwrap();
        assert_eq!(runs.len(), 2);
        let closed = runs.iter().find(|r| r.id == old_run_id).unwrap();
        assert_eq!(closed.state, RunState::Closed);
        assert!(closed.end_time.is_some());
        assert_eq!(closed.production_total, 50);

        assert_eq!(f.store.active_run_count(f.device.id).await, 1);
    }

    #[tokio::test]
    async fn ledger_increments_sum_to_run_total() {
        let f = fixture().await;
        for value in [100, 130, 130, 180, 178, 20, 45] {
            ingest(&f, "P-100", value).await;
        }

        let run = f.store.find_active_run(f.device.id).await.unwrap().unwrap();
        let readings = f.store.readings_for_run(run.id, 1000).await.unwrap();

        assert_eq!(readings.len(), run.reading_count as usize);
        let sum: i64 = readings.iter().map(|r| r.increment).sum();
        assert_eq!(sum, run.production_total);
    }

    #[tokio::test]
    async fn rollups_reflect_every_reading_once() {
        let f = fixture().await;
        ingest(&f, "P-100", 100).await;
        ingest(&f, "P-100", 150).await;
        ingest(&f, "P-100", 10).await; // reset
        ingest(&f, "P-200", 400).await; // product change
        ingest(&f, "P-200", 410).await;

        let today = bucket_date(Utc::now());
        let daily = f
            .store
            .daily_range(f.device.id, &today, &today)
            .await
            .unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].production_total, 60);
        assert_eq!(daily[0].reading_count, 5);
        assert_eq!(daily[0].reset_count, 1);
        assert_eq!(daily[0].runs_started, 2);
        assert_eq!(daily[0].runs_closed, 1);

        let hourly = f
            .store
            .hourly_range(f.device.id, &today, &today)
            .await
            .unwrap();
        let hourly_total: i64 = hourly.iter().map(|h| h.production_total).sum();
        let hourly_readings: i32 = hourly.iter().map(|h| h.reading_count).sum();
        assert_eq!(hourly_total, daily[0].production_total);
        assert_eq!(hourly_readings, daily[0].reading_count);
    }

    #[tokio::test]
    async fn unknown_device_rejected_before_any_mutation() {
        let f = fixture().await;
        let err = ingest_reading(f.store.as_ref(), &f.locks, THRESHOLD, "NO-SUCH", "P-100", 10)
            .await
            .unwrap_err();

        assert_eq!(err.err_type, ErrorType::BadRequest);
        assert_eq!(f.store.run_count().await, 0);
        assert_eq!(f.store.reading_count().await, 0);
    }

    #[tokio::test]
    async fn inactive_product_rejected_before_any_mutation() {
        let f = fixture().await;
        f.store
            .add_product(Product {
                id: ObjectId::new(),
                name: "Retired".to_string(),
                code: Some("P-999".to_string()),
                active: false,
            })
            .await;

        let err = ingest_reading(f.store.as_ref(), &f.locks, THRESHOLD, "CNT-07", "P-999", 10)
            .await
            .unwrap_err();

        assert_eq!(err.err_type, ErrorType::BadRequest);
        assert_eq!(f.store.run_count().await, 0);
    }

    #[tokio::test]
    async fn negative_value_rejected() {
        let f = fixture().await;
        let err = ingest_reading(f.store.as_ref(), &f.locks, THRESHOLD, "CNT-07", "P-100", -1)
            .await
            .unwrap_err();
        assert_eq!(err.err_type, ErrorType::BadRequest);
    }

    #[tokio::test]
    async fn concurrent_ingestions_keep_one_active_run() {
        let f = fixture().await;
        let mut handles = Vec::new();

        for i in 0..16i64 {
            let store = f.store.clone();
            let locks = f.locks.clone();
            handles.push(tokio::spawn(async move {
                ingest_reading(
                    store.as_ref(),
                    &locks,
                    THRESHOLD,
                    "CNT-07",
                    "P-100",
                    100 + i * 10,
                )
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(f.store.active_run_count(f.device.id).await, 1);
        assert_eq!(f.store.reading_count().await, 16);

        let run = f.store.find_active_run(f.device.id).await.unwrap().unwrap();
        assert_eq!(run.reading_count, 16);
        let readings = f.store.readings_for_run(run.id, 1000).await.unwrap();
        let sum: i64 = readings.iter().map(|r| r.increment).sum();
        assert_eq!(sum, run.production_total);
    }

    #[tokio::test]
    async fn snapshots_track_channel_increments() {
        let f = fixture().await;
        let machine_hex = f.machine.id.to_hex();

        let first = ingest_snapshot(f.store.as_ref(), &machine_hex, 100, 5, &None)
            .await
            .unwrap();
        assert_eq!(first.ok_increment, 0);
        assert_eq!(first.nok_increment, 0);
        assert_eq!(first.total_units, 105);

        let second = ingest_snapshot(f.store.as_ref(), &machine_hex, 150, 7, &None)
            .await
            .unwrap();
        assert_eq!(second.ok_increment, 50);
        assert_eq!(second.nok_increment, 2);
        assert_eq!(second.quality_percent, round2(150.0 / 157.0 * 100.0));

        // A downward jump on one channel is a reset there (threshold 0),
        // the other channel keeps counting.
        let third = ingest_snapshot(f.store.as_ref(), &machine_hex, 10, 9, &None)
            .await
            .unwrap();
        assert_eq!(third.ok_increment, 0);
        assert_eq!(third.nok_increment, 2);
    }

    /// Delegates to a MemoryStore but loses every run-update version race,
    /// as if another writer always got there first.
    struct ContendedStore {
        inner: Arc<MemoryStore>,
    }

    #[async_trait::async_trait]
    impl CounterStore for ContendedStore {
        async fn resolve_device(
            &self,
            identifier: &str,
        ) -> Result<Option<CounterDevice>, AppError> {
            self.inner.resolve_device(identifier).await
        }

        async fn resolve_product(&self, identifier: &str) -> Result<Option<Product>, AppError> {
            self.inner.resolve_product(identifier).await
        }

        async fn find_device(&self, id: ObjectId) -> Result<Option<CounterDevice>, AppError> {
            self.inner.find_device(id).await
        }

        async fn find_machine(&self, id: ObjectId) -> Result<Option<Machine>, AppError> {
            self.inner.find_machine(id).await
        }

        async fn find_active_run(
            &self,
            device_id: ObjectId,
        ) -> Result<Option<ProductionRun>, AppError> {
            self.inner.find_active_run(device_id).await
        }

        async fn insert_run(&self, run: &ProductionRun) -> Result<(), AppError> {
            self.inner.insert_run(run).await
        }

        async fn update_run(&self, run: &ProductionRun) -> Result<(), AppError> {
            Err(AppError::new(
                format!("run {} was modified concurrently", run.id).as_str(),
                ErrorType::Conflict,
            ))
        }

        async fn upsert_hourly(
            &self,
            device_id: ObjectId,
            product_id: Option<ObjectId>,
            date: &str,
            hour: i32,
            c: &ReadingContribution,
        ) -> Result<(), AppError> {
            self.inner.upsert_hourly(device_id, product_id, date, hour, c).await
        }

        async fn upsert_daily(
            &self,
            device_id: ObjectId,
            product_id: Option<ObjectId>,
            date: &str,
            c: &ReadingContribution,
        ) -> Result<(), AppError> {
            self.inner.upsert_daily(device_id, product_id, date, c).await
        }

        async fn insert_reading(&self, reading: &CounterReading) -> Result<(), AppError> {
            self.inner.insert_reading(reading).await
        }

        async fn runs_for_device(
            &self,
            device_id: ObjectId,
            from: Option<chrono::DateTime<Utc>>,
            to: Option<chrono::DateTime<Utc>>,
            limit: i64,
        ) -> Result<Vec<ProductionRun>, AppError> {
            self.inner.runs_for_device(device_id, from, to, limit).await
        }

        async fn readings_for_run(
            &self,
            run_id: ObjectId,
            limit: i64,
        ) -> Result<Vec<CounterReading>, AppError> {
            self.inner.readings_for_run(run_id, limit).await
        }

        async fn readings_since(
            &self,
            device_id: ObjectId,
            since: chrono::DateTime<Utc>,
        ) -> Result<Vec<CounterReading>, AppError> {
            self.inner.readings_since(device_id, since).await
        }

        async fn hourly_range(
            &self,
            device_id: ObjectId,
            from_date: &str,
            to_date: &str,
        ) -> Result<Vec<crate::models::HourlySummary>, AppError> {
            self.inner.hourly_range(device_id, from_date, to_date).await
        }

        async fn daily_range(
            &self,
            device_id: ObjectId,
            from_date: &str,
            to_date: &str,
        ) -> Result<Vec<crate::models::DailySummary>, AppError> {
            self.inner.daily_range(device_id, from_date, to_date).await
        }

        async fn last_snapshot(
            &self,
            machine_id: ObjectId,
        ) -> Result<Option<CounterSnapshot>, AppError> {
            self.inner.last_snapshot(machine_id).await
        }

        async fn insert_snapshot(&self, snapshot: &CounterSnapshot) -> Result<(), AppError> {
            self.inner.insert_snapshot(snapshot).await
        }

        async fn recent_snapshots(&self, limit: i64) -> Result<Vec<CounterSnapshot>, AppError> {
            self.inner.recent_snapshots(limit).await
        }
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_conflict() {
        let f = fixture().await;
        // Baseline goes through the plain store and opens the run.
        ingest(&f, "P-100", 100).await;

        let contended = ContendedStore {
            inner: f.store.clone(),
        };
        let err = ingest_reading(&contended, &f.locks, THRESHOLD, "CNT-07", "P-100", 150)
            .await
            .unwrap_err();

        assert_eq!(err.err_type, ErrorType::Conflict);
        // The failed attempts left no ledger entries behind.
        assert_eq!(f.store.reading_count().await, 1);
        let run = f.store.find_active_run(f.device.id).await.unwrap().unwrap();
        assert_eq!(run.production_total, 0);
        assert_eq!(run.reading_count, 1);
    }

    #[tokio::test]
    async fn snapshot_unknown_machine_rejected() {
        let f = fixture().await;
        let err = ingest_snapshot(f.store.as_ref(), &ObjectId::new().to_hex(), 1, 0, &None)
            .await
            .unwrap_err();
        assert_eq!(err.err_type, ErrorType::BadRequest);
    }
}

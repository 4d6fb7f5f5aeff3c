//! In-memory store, the fake the core is tested against. Mirrors the
//! mongo implementation's semantics, including the version guard and the
//! rollup merge rules (via core::rollup, so the two cannot diverge).

use crate::core::rollup::{
    apply_daily, apply_hourly, seed_daily, seed_hourly, ReadingContribution,
};
use crate::errors::{AppError, ErrorType};
use crate::models::{
    CounterDevice, CounterReading, CounterSnapshot, DailySummary, HourlySummary, Machine, Product,
    ProductionRun, RunState,
};
use crate::store::CounterStore;
use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    machines: HashMap<ObjectId, Machine>,
    products: HashMap<ObjectId, Product>,
    devices: HashMap<ObjectId, CounterDevice>,
    runs: HashMap<ObjectId, ProductionRun>,
    readings: Vec<CounterReading>,
    hourly: HashMap<(ObjectId, String, i32), HourlySummary>,
    daily: HashMap<(ObjectId, String), DailySummary>,
    snapshots: Vec<CounterSnapshot>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub async fn add_machine(&self, machine: Machine) {
        self.state.lock().await.machines.insert(machine.id, machine);
    }

    pub async fn add_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn add_device(&self, device: CounterDevice) {
        self.state.lock().await.devices.insert(device.id, device);
    }

    pub async fn run_count(&self) -> usize {
        self.state.lock().await.runs.len()
    }

    pub async fn reading_count(&self) -> usize {
        self.state.lock().await.readings.len()
    }

    pub async fn active_run_count(&self, device_id: ObjectId) -> usize {
        self.state
            .lock()
            .await
            .runs
            .values()
            .filter(|r| r.device_id == device_id && r.state == RunState::Active)
            .count()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn resolve_device(&self, identifier: &str) -> Result<Option<CounterDevice>, AppError> {
        let state = self.state.lock().await;
        let device = match ObjectId::parse_str(identifier) {
            Ok(id) => state.devices.get(&id).cloned(),
            Err(_) => state
                .devices
                .values()
                .find(|d| d.code == identifier)
                .cloned(),
        };

        Ok(device.filter(|d| d.active))
    }

    async fn resolve_product(&self, identifier: &str) -> Result<Option<Product>, AppError> {
        let state = self.state.lock().await;
        let product = match ObjectId::parse_str(identifier) {
            Ok(id) => state.products.get(&id).cloned(),
            Err(_) => state
                .products
                .values()
                .find(|p| p.code.as_deref() == Some(identifier))
                .cloned(),
        };

        Ok(product.filter(|p| p.active))
    }

    async fn find_device(&self, id: ObjectId) -> Result<Option<CounterDevice>, AppError> {
        Ok(self.state.lock().await.devices.get(&id).cloned())
    }

    async fn find_machine(&self, id: ObjectId) -> Result<Option<Machine>, AppError> {
        let state = self.state.lock().await;
        Ok(state.machines.get(&id).cloned().filter(|m| m.active))
    }

    async fn find_active_run(
        &self,
        device_id: ObjectId,
    ) -> Result<Option<ProductionRun>, AppError> {
        let state = self.state.lock().await;
        let mut active: Vec<ProductionRun> = state
            .runs
            .values()
            .filter(|r| r.device_id == device_id && r.state == RunState::Active)
            .cloned()
            .collect();

        if active.len() > 1 {
            log::error!(
                "invariant violated: {} active runs for device {}, manual reconciliation required",
                active.len(),
                device_id
            );
            return Err(AppError::new(
                format!("more than one active run for device {}", device_id).as_str(),
                ErrorType::Internal,
            ));
        }

        Ok(active.pop())
    }

    async fn insert_run(&self, run: &ProductionRun) -> Result<(), AppError> {
        self.state.lock().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &ProductionRun) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let stored = state.runs.get(&run.id).ok_or_else(|| {
            AppError::new(
                format!("run {} does not exist", run.id).as_str(),
                ErrorType::Internal,
            )
        })?;

        if stored.version != run.version {
            return Err(AppError::new(
                format!("run {} was modified concurrently", run.id).as_str(),
                ErrorType::Conflict,
            ));
        }

        let mut updated = run.clone();
        updated.version += 1;
        state.runs.insert(updated.id, updated);
        Ok(())
    }

    async fn upsert_hourly(
        &self,
        device_id: ObjectId,
        product_id: Option<ObjectId>,
        date: &str,
        hour: i32,
        c: &ReadingContribution,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let key = (device_id, date.to_string(), hour);
        match state.hourly.get_mut(&key) {
            Some(summary) => apply_hourly(summary, product_id, c),
            None => {
                state
                    .hourly
                    .insert(key, seed_hourly(device_id, product_id, date, hour, c));
            }
        }
        Ok(())
    }

    async fn upsert_daily(
        &self,
        device_id: ObjectId,
        product_id: Option<ObjectId>,
        date: &str,
        c: &ReadingContribution,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let key = (device_id, date.to_string());
        match state.daily.get_mut(&key) {
            Some(summary) => apply_daily(summary, product_id, c),
            None => {
                state
                    .daily
                    .insert(key, seed_daily(device_id, product_id, date, c));
            }
        }
        Ok(())
    }

    async fn insert_reading(&self, reading: &CounterReading) -> Result<(), AppError> {
        self.state.lock().await.readings.push(reading.clone());
        Ok(())
    }

    async fn runs_for_device(
        &self,
        device_id: ObjectId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ProductionRun>, AppError> {
        let state = self.state.lock().await;
        let from = from.map(bson::DateTime::from_chrono);
        let to = to.map(bson::DateTime::from_chrono);

        let mut runs: Vec<ProductionRun> = state
            .runs
            .values()
            .filter(|r| r.device_id == device_id)
            .filter(|r| from.map_or(true, |f| r.start_time >= f))
            .filter(|r| to.map_or(true, |t| r.start_time <= t))
            .cloned()
            .collect();

        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn readings_for_run(
        &self,
        run_id: ObjectId,
        limit: i64,
    ) -> Result<Vec<CounterReading>, AppError> {
        let state = self.state.lock().await;
        let mut readings: Vec<CounterReading> = state
            .readings
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect();

        readings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        readings.truncate(limit.max(0) as usize);
        Ok(readings)
    }

    async fn readings_since(
        &self,
        device_id: ObjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<CounterReading>, AppError> {
        let state = self.state.lock().await;
        let since = bson::DateTime::from_chrono(since);
        let mut readings: Vec<CounterReading> = state
            .readings
            .iter()
            .filter(|r| r.device_id == device_id && r.timestamp >= since)
            .cloned()
            .collect();

        readings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(readings)
    }

    async fn hourly_range(
        &self,
        device_id: ObjectId,
        from_date: &str,
        to_date: &str,
    ) -> Result<Vec<HourlySummary>, AppError> {
        let state = self.state.lock().await;
        let mut summaries: Vec<HourlySummary> = state
            .hourly
            .values()
            .filter(|s| {
                s.device_id == device_id
                    && s.date.as_str() >= from_date
                    && s.date.as_str() <= to_date
            })
            .cloned()
            .collect();

        summaries.sort_by(|a, b| a.date.cmp(&b.date).then(a.hour.cmp(&b.hour)));
        Ok(summaries)
    }

    async fn daily_range(
        &self,
        device_id: ObjectId,
        from_date: &str,
        to_date: &str,
    ) -> Result<Vec<DailySummary>, AppError> {
        let state = self.state.lock().await;
        let mut summaries: Vec<DailySummary> = state
            .daily
            .values()
            .filter(|s| {
                s.device_id == device_id
                    && s.date.as_str() >= from_date
                    && s.date.as_str() <= to_date
            })
            .cloned()
            .collect();

        summaries.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(summaries)
    }

    async fn last_snapshot(
        &self,
        machine_id: ObjectId,
    ) -> Result<Option<CounterSnapshot>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.machine_id == machine_id)
            .max_by_key(|s| s.timestamp)
            .cloned())
    }

    async fn insert_snapshot(&self, snapshot: &CounterSnapshot) -> Result<(), AppError> {
        self.state.lock().await.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn recent_snapshots(&self, limit: i64) -> Result<Vec<CounterSnapshot>, AppError> {
        let state = self.state.lock().await;
        let mut snapshots: Vec<CounterSnapshot> = state.snapshots.clone();
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        snapshots.truncate(limit.max(0) as usize);
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunState;

    fn run_for(device_id: ObjectId) -> ProductionRun {
        ProductionRun {
            id: ObjectId::new(),
            device_id,
            product_id: Some(ObjectId::new()),
            start_time: bson::DateTime::now(),
            end_time: None,
            initial_value: 100,
            final_value: 100,
            last_value: 100,
            production_total: 0,
            reset_count: 0,
            reading_count: 1,
            state: RunState::Active,
            version: 0,
        }
    }

    #[tokio::test]
    async fn stale_version_update_is_a_conflict() {
        let store = MemoryStore::new();
        let run = run_for(ObjectId::new());
        store.insert_run(&run).await.unwrap();

        // First writer wins, the stored version moves to 1.
        store.update_run(&run).await.unwrap();

        // A second writer still holding version 0 must not overwrite.
        let err = store.update_run(&run).await.unwrap_err();
        assert_eq!(err.err_type, ErrorType::Conflict);

        let mut fresh = store
            .find_active_run(run.device_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.version, 1);

        // Rereading and updating with the current version succeeds again.
        fresh.production_total = 7;
        store.update_run(&fresh).await.unwrap();
        let stored = store
            .find_active_run(run.device_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.production_total, 7);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn two_active_runs_surface_as_internal_error() {
        let store = MemoryStore::new();
        let device_id = ObjectId::new();
        store.insert_run(&run_for(device_id)).await.unwrap();
        store.insert_run(&run_for(device_id)).await.unwrap();

        // Never silently repaired, the caller has to see it.
        let err = store.find_active_run(device_id).await.unwrap_err();
        assert_eq!(err.err_type, ErrorType::Internal);
    }

    #[tokio::test]
    async fn closed_runs_do_not_block_a_new_active_run() {
        let store = MemoryStore::new();
        let device_id = ObjectId::new();
        let mut closed = run_for(device_id);
        closed.state = RunState::Closed;
        closed.end_time = Some(bson::DateTime::now());
        store.insert_run(&closed).await.unwrap();

        let active = run_for(device_id);
        store.insert_run(&active).await.unwrap();

        let found = store.find_active_run(device_id).await.unwrap().unwrap();
        assert_eq!(found.id, active.id);
    }
}

use crate::core::rollup::ReadingContribution;
use crate::errors::{AppError, ErrorType};
use crate::models::{
    CounterDevice, CounterReading, CounterSnapshot, DailySummary, HourlySummary, Machine, Product,
    ProductionRun, RunState,
};
use crate::store::CounterStore;
use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{FindOneOptions, FindOptions, UpdateOptions};
use mongodb::{Collection, Database};

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> MongoStore {
        MongoStore { db }
    }

    fn machines(&self) -> Collection<Machine> {
        self.db.collection("machines")
    }

    fn products(&self) -> Collection<Product> {
        self.db.collection("products")
    }

    fn devices(&self) -> Collection<CounterDevice> {
        self.db.collection("counter_devices")
    }

    fn runs(&self) -> Collection<ProductionRun> {
        self.db.collection("production_runs")
    }

    fn readings(&self) -> Collection<CounterReading> {
        self.db.collection("counter_readings")
    }

    fn hourly(&self) -> Collection<HourlySummary> {
        self.db.collection("hourly_summaries")
    }

    fn daily(&self) -> Collection<DailySummary> {
        self.db.collection("daily_summaries")
    }

    fn snapshots(&self) -> Collection<CounterSnapshot> {
        self.db.collection("counter_snapshots")
    }
}

#[async_trait]
impl CounterStore for MongoStore {
    async fn resolve_device(&self, identifier: &str) -> Result<Option<CounterDevice>, AppError> {
        let filter = match ObjectId::parse_str(identifier) {
            Ok(id) => doc! { "_id": id, "active": true },
            Err(_) => doc! { "code": identifier, "active": true },
        };

        self.devices()
            .find_one(filter, None)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While resolving device:"))
    }

    async fn resolve_product(&self, identifier: &str) -> Result<Option<Product>, AppError> {
        let filter = match ObjectId::parse_str(identifier) {
            Ok(id) => doc! { "_id": id, "active": true },
            Err(_) => doc! { "code": identifier, "active": true },
        };

        self.products()
            .find_one(filter, None)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While resolving product:"))
    }

    async fn find_device(&self, id: ObjectId) -> Result<Option<CounterDevice>, AppError> {
        self.devices()
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While fetching device:"))
    }

    async fn find_machine(&self, id: ObjectId) -> Result<Option<Machine>, AppError> {
        self.machines()
            .find_one(doc! { "_id": id, "active": true }, None)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While fetching machine:"))
    }

    async fn find_active_run(
        &self,
        device_id: ObjectId,
    ) -> Result<Option<ProductionRun>, AppError> {
        let mut active = self
            .runs()
            .find(
                doc! { "deviceId": device_id, "state": RunState::Active.as_str() },
                None,
            )
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While fetching active run:"))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While fetching active run:"))?;

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
        self.runs()
            .insert_one(run, None)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While inserting run:"))?;

        Ok(())
    }

    async fn update_run(&self, run: &ProductionRun) -> Result<(), AppError> {
        let filter = doc! { "_id": run.id, "version": run.version };
        let update = doc! {
            "$set": {
                "endTime": run.end_time,
                "initialValue": run.initial_value,
                "finalValue": run.final_value,
                "lastValue": run.last_value,
                "productionTotal": run.production_total,
                "resetCount": run.reset_count,
                "readingCount": run.reading_count,
                "state": run.state.as_str(),
                "version": run.version + 1,
            }
        };

        let result = self
            .runs()
            .update_one(filter, update, None)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While updating run:"))?;

        if result.matched_count == 0 {
            return Err(AppError::new(
                format!("run {} was modified concurrently", run.id).as_str(),
                ErrorType::Conflict,
            ));
        }

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
        let filter = doc! { "deviceId": device_id, "date": date, "hour": hour };
        let update = doc! {
            "$inc": {
                "productionTotal": c.increment,
                "readingCount": 1,
                "resetCount": if c.is_reset { 1 } else { 0 },
            },
            "$set": { "lastValue": c.value, "productId": product_id },
            "$min": { "minValue": c.value },
            "$max": { "maxValue": c.value },
            "$setOnInsert": { "firstValue": c.value },
        };
        let options = UpdateOptions::builder().upsert(true).build();

        self.hourly()
            .update_one(filter, update, options)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While upserting hourly summary:"))?;

        Ok(())
    }

    async fn upsert_daily(
        &self,
        device_id: ObjectId,
        product_id: Option<ObjectId>,
        date: &str,
        c: &ReadingContribution,
    ) -> Result<(), AppError> {
        let filter = doc! { "deviceId": device_id, "date": date };
        let update = doc! {
            "$inc": {
                "productionTotal": c.increment,
                "readingCount": 1,
                "resetCount": if c.is_reset { 1 } else { 0 },
                "runsStarted": if c.run_started { 1 } else { 0 },
                "runsClosed": if c.run_closed { 1 } else { 0 },
            },
            "$set": { "productId": product_id },
        };
        let options = UpdateOptions::builder().upsert(true).build();

        self.daily()
            .update_one(filter, update, options)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While upserting daily summary:"))?;

        Ok(())
    }

    async fn insert_reading(&self, reading: &CounterReading) -> Result<(), AppError> {
        self.readings()
            .insert_one(reading, None)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While appending reading:"))?;

        Ok(())
    }

    async fn runs_for_device(
        &self,
        device_id: ObjectId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ProductionRun>, AppError> {
        let mut filter = doc! { "deviceId": device_id };
        let mut range = Document::new();
        if let Some(from) = from {
            range.insert("$gte", bson::DateTime::from_chrono(from));
        }
        if let Some(to) = to {
            range.insert("$lte", bson::DateTime::from_chrono(to));
        }
        if !range.is_empty() {
            filter.insert("startTime", range);
        }

        let options = FindOptions::builder()
            .sort(doc! { "startTime": -1 })
            .limit(limit)
            .build();

        self.runs()
            .find(filter, options)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While listing runs:"))?
            .try_collect()
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While listing runs:"))
    }

    async fn readings_for_run(
        &self,
        run_id: ObjectId,
        limit: i64,
    ) -> Result<Vec<CounterReading>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": 1 })
            .limit(limit)
            .build();

        self.readings()
            .find(doc! { "runId": run_id }, options)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While listing run readings:"))?
            .try_collect()
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While listing run readings:"))
    }

    async fn readings_since(
        &self,
        device_id: ObjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<CounterReading>, AppError> {
        let filter = doc! {
            "deviceId": device_id,
            "timestamp": { "$gte": bson::DateTime::from_chrono(since) },
        };
        let options = FindOptions::builder().sort(doc! { "timestamp": 1 }).build();

        self.readings()
            .find(filter, options)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While listing recent readings:"))?
            .try_collect()
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While listing recent readings:"))
    }

    async fn hourly_range(
        &self,
        device_id: ObjectId,
        from_date: &str,
        to_date: &str,
    ) -> Result<Vec<HourlySummary>, AppError> {
        let filter = doc! {
            "deviceId": device_id,
            "date": { "$gte": from_date, "$lte": to_date },
        };
        let options = FindOptions::builder()
            .sort(doc! { "date": 1, "hour": 1 })
            .build();

        self.hourly()
            .find(filter, options)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While fetching hourly summaries:"))?
            .try_collect()
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While fetching hourly summaries:"))
    }

    async fn daily_range(
        &self,
        device_id: ObjectId,
        from_date: &str,
        to_date: &str,
    ) -> Result<Vec<DailySummary>, AppError> {
        let filter = doc! {
            "deviceId": device_id,
            "date": { "$gte": from_date, "$lte": to_date },
        };
        let options = FindOptions::builder().sort(doc! { "date": 1 }).build();

        self.daily()
            .find(filter, options)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While fetching daily summaries:"))?
            .try_collect()
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While fetching daily summaries:"))
    }

    async fn last_snapshot(
        &self,
        machine_id: ObjectId,
    ) -> Result<Option<CounterSnapshot>, AppError> {
        let options = FindOneOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .build();

        self.snapshots()
            .find_one(doc! { "machineId": machine_id }, options)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While fetching last snapshot:"))
    }

    async fn insert_snapshot(&self, snapshot: &CounterSnapshot) -> Result<(), AppError> {
        self.snapshots()
            .insert_one(snapshot, None)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While inserting snapshot:"))?;

        Ok(())
    }

    async fn recent_snapshots(&self, limit: i64) -> Result<Vec<CounterSnapshot>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .limit(limit)
            .build();

        self.snapshots()
            .find(doc! {}, options)
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While listing snapshots:"))?
            .try_collect()
            .await
            .map_err(|e| AppError::from_mongo_err(e, "While listing snapshots:"))
    }
}

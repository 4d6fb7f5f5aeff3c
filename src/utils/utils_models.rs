use crate::models::{CounterReading, CounterSnapshot, ProductionRun};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// Body for POST /api/counters/readings. Device and product take an id in
// hex or a human-readable code.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestReadingRequest {
    pub device: String,
    pub product: String,
    pub value: i64,
}

// Query form of the same request, for PLCs that can only issue GETs.
// Ex: /api/counters/readings/ingest?device=CNT-07&product=P-100&value=1234
#[derive(Debug, Serialize, Deserialize, IntoParams)]
pub struct PlcReadingQuery {
    pub device: String,
    pub product: String,
    pub value: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingResponse {
    pub success: bool,
    pub message: String,
    pub reading_id: Option<String>,
    pub run_id: Option<String>,
    pub increment: i64,
    pub run_total: i64,
    pub is_reset: bool,
    pub is_noise: bool,
    pub run_created: bool,
    pub run_replaced: bool,
}

impl ReadingResponse {
    pub fn failure(message: &str) -> ReadingResponse {
        ReadingResponse {
            success: false,
            message: message.to_string(),
            reading_id: None,
            run_id: None,
            increment: 0,
            run_total: 0,
            is_reset: false,
            is_noise: false,
            run_created: false,
            run_replaced: false,
        }
    }
}

// Query for /devices/{id}/runs
#[derive(Debug, Serialize, Deserialize, IntoParams)]
pub struct RunsQueries {
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<i64>,
}

// Query for /runs/{id}/readings
#[derive(Debug, Serialize, Deserialize, IntoParams)]
pub struct RunReadingsQueries {
    pub limit: Option<i64>,
}

// Query for /devices/{id}/history
#[derive(Debug, Serialize, Deserialize, IntoParams)]
pub struct HistoryQueries {
    pub from: Option<String>,
    pub to: Option<String>,
    /// "hour" (default) or "day"
    pub granularity: Option<String>,
}

// Query for /devices/{id}/readings/recent
#[derive(Debug, Serialize, Deserialize, IntoParams)]
pub struct RecentQueries {
    pub minutes: Option<i64>,
}

// Query for /snapshots/recent
#[derive(Debug, Serialize, Deserialize, IntoParams)]
pub struct SnapshotsQueries {
    pub limit: Option<i64>,
}

// Body for POST /api/counters/snapshots (legacy OK/NOK firmware)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SnapshotRequest {
    pub machine: String,
    pub ok: i64,
    pub nok: i64,
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub success: bool,
    pub message: String,
    pub snapshot_id: Option<String>,
    pub total_units: i64,
    pub quality_percent: f64,
    pub defect_percent: f64,
    pub ok_increment: i64,
    pub nok_increment: i64,
}

impl SnapshotResponse {
    pub fn failure(message: &str) -> SnapshotResponse {
        SnapshotResponse {
            success: false,
            message: message.to_string(),
            snapshot_id: None,
            total_units: 0,
            quality_percent: 0.0,
            defect_percent: 0.0,
            ok_increment: 0,
            nok_increment: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunDto {
    pub id: String,
    pub device_id: String,
    pub product_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub initial_value: i64,
    pub final_value: i64,
    pub last_value: i64,
    pub production_total: i64,
    pub reset_count: i32,
    pub reading_count: i32,
    pub state: String,
    pub duration_minutes: Option<i64>,
}

impl From<ProductionRun> for RunDto {
    fn from(run: ProductionRun) -> RunDto {
        let start = run.start_time.to_chrono();
        let end = run.end_time.map(|t| t.to_chrono());

        RunDto {
            id: run.id.to_hex(),
            device_id: run.device_id.to_hex(),
            product_id: run.product_id.map(|p| p.to_hex()),
            start_time: start,
            end_time: end,
            initial_value: run.initial_value,
            final_value: run.final_value,
            last_value: run.last_value,
            production_total: run.production_total,
            reset_count: run.reset_count,
            reading_count: run.reading_count,
            state: run.state.as_str().to_string(),
            duration_minutes: end.map(|e| (e - start).num_minutes()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingDto {
    pub id: String,
    pub run_id: String,
    pub device_id: String,
    pub product_id: Option<String>,
    pub value: i64,
    pub previous_value: Option<i64>,
    pub delta: i64,
    pub increment: i64,
    pub is_reset: bool,
    pub is_noise: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<CounterReading> for ReadingDto {
    fn from(reading: CounterReading) -> ReadingDto {
        ReadingDto {
            id: reading.id.to_hex(),
            run_id: reading.run_id.to_hex(),
            device_id: reading.device_id.to_hex(),
            product_id: reading.product_id.map(|p| p.to_hex()),
            value: reading.value,
            previous_value: reading.previous_value,
            delta: reading.delta,
            increment: reading.increment,
            is_reset: reading.is_reset,
            is_noise: reading.is_noise,
            timestamp: reading.timestamp.to_chrono(),
        }
    }
}

// Slim point for live charting.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPointDto {
    pub timestamp: DateTime<Utc>,
    pub value: i64,
    pub increment: i64,
    pub is_reset: bool,
    pub is_noise: bool,
}

impl From<&CounterReading> for ReadingPointDto {
    fn from(reading: &CounterReading) -> ReadingPointDto {
        ReadingPointDto {
            timestamp: reading.timestamp.to_chrono(),
            value: reading.value,
            increment: reading.increment,
            is_reset: reading.is_reset,
            is_noise: reading.is_noise,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub date: String,
    pub hour: Option<i32>,
    pub production: i64,
    pub resets: i32,
    pub readings: i32,
    pub first_value: Option<i64>,
    pub last_value: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub device_id: String,
    pub device_name: String,
    pub from: String,
    pub to: String,
    pub granularity: String,
    pub points: Vec<HistoryPoint>,
    pub total_production: i64,
    pub total_resets: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeResponse {
    pub device_id: String,
    pub device_name: String,
    pub active_run: Option<RunDto>,
    pub readings: Vec<ReadingPointDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDto {
    pub id: String,
    pub machine_id: String,
    pub ok_value: i64,
    pub nok_value: i64,
    pub model_id: Option<String>,
    pub ok_increment: i64,
    pub nok_increment: i64,
    pub total_units: i64,
    pub quality_percent: f64,
    pub defect_percent: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<CounterSnapshot> for SnapshotDto {
    fn from(snapshot: CounterSnapshot) -> SnapshotDto {
        SnapshotDto {
            id: snapshot.id.to_hex(),
            machine_id: snapshot.machine_id.to_hex(),
            model_id: snapshot.model_id.map(|m| m.to_hex()),
            ok_value: snapshot.ok_value,
            nok_value: snapshot.nok_value,
            ok_increment: snapshot.ok_increment,
            nok_increment: snapshot.nok_increment,
            total_units: snapshot.total_units(),
            quality_percent: crate::utils::utils_functions::round2(snapshot.quality_percent()),
            defect_percent: crate::utils::utils_functions::round2(snapshot.defect_percent()),
            timestamp: snapshot.timestamp.to_chrono(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductionRun, RunState};
    use bson::oid::ObjectId;

    fn closed_run(minutes: i64) -> ProductionRun {
        let start = Utc::now();
        ProductionRun {
            id: ObjectId::new(),
            device_id: ObjectId::new(),
            product_id: Some(ObjectId::new()),
            start_time: bson::DateTime::from_chrono(start),
            end_time: Some(bson::DateTime::from_chrono(
                start + chrono::Duration::minutes(minutes),
            )),
            initial_value: 100,
            final_value: 150,
            last_value: 150,
            production_total: 50,
            reset_count: 0,
            reading_count: 3,
            state: RunState::Closed,
            version: 2,
        }
    }

    #[test]
    fn reading_response_serializes_camel_case() {
        let response = ReadingResponse {
            success: true,
            message: "reading recorded".to_string(),
            reading_id: Some(ObjectId::new().to_hex()),
            run_id: Some(ObjectId::new().to_hex()),
            increment: 50,
            run_total: 50,
            is_reset: false,
            is_noise: false,
            run_created: false,
            run_replaced: false,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["runTotal"], 50);
        assert_eq!(json["isReset"], false);
        assert_eq!(json["runCreated"], false);
        assert!(json.get("run_total").is_none());
        assert!(json["readingId"].is_string());
    }

    #[test]
    fn run_dto_carries_duration_for_closed_runs() {
        let dto = RunDto::from(closed_run(42));

        assert_eq!(dto.duration_minutes, Some(42));
        assert_eq!(dto.state, "Closed");

        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["durationMinutes"], 42);
        assert_eq!(json["productionTotal"], 50);
    }

    #[test]
    fn run_dto_has_no_duration_while_active() {
        let mut run = closed_run(42);
        run.end_time = None;
        run.state = RunState::Active;

        let dto = RunDto::from(run);
        assert_eq!(dto.duration_minutes, None);
        assert_eq!(dto.state, "Active");
    }
}

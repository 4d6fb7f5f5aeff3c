use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Reference entity, managed by the plant webapp. Read-only here.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub active: bool,
}

/// Reference entity, managed by the plant webapp. Read-only here.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub code: Option<String>,
    pub active: bool,
}

/// One physical counting point mounted on a machine.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CounterDevice {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub machine_id: ObjectId,
    pub name: String,
    pub code: String,
    pub counter_type: String, // Production, Cycles, Defects
    pub active: bool,
    pub created_at: bson::DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Active,
    Closed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Active => "Active",
            RunState::Closed => "Closed",
        }
    }
}

/// One continuous counting session for a device and product.
/// At most one run per device may be Active at any time.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProductionRun {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub device_id: ObjectId,
    pub product_id: Option<ObjectId>,
    pub start_time: bson::DateTime,
    pub end_time: Option<bson::DateTime>,
    pub initial_value: i64,
    pub final_value: i64,
    /// Last raw counter value seen, including noise readings. Deltas are
    /// always computed against this, not against final_value.
    pub last_value: i64,
    pub production_total: i64,
    pub reset_count: i32,
    pub reading_count: i32,
    pub state: RunState,
    /// Optimistic concurrency stamp, bumped on every update.
    pub version: i64,
}

/// Ledger entry for one processed reading. Immutable once written.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CounterReading {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub run_id: ObjectId,
    pub device_id: ObjectId,
    pub product_id: Option<ObjectId>,
    pub value: i64,
    pub previous_value: Option<i64>,
    pub delta: i64,
    pub increment: i64,
    pub is_reset: bool,
    pub is_noise: bool,
    pub timestamp: bson::DateTime,
}

/// Additive rollup, one document per (device, date, hour).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HourlySummary {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub device_id: ObjectId,
    pub product_id: Option<ObjectId>,
    pub date: String, // YYYY-MM-DD
    pub hour: i32,    // 0-23
    pub production_total: i64,
    pub reading_count: i32,
    pub reset_count: i32,
    pub first_value: i64,
    pub last_value: i64,
    pub min_value: i64,
    pub max_value: i64,
}

/// Additive rollup, one document per (device, date).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub device_id: ObjectId,
    pub product_id: Option<ObjectId>,
    pub date: String, // YYYY-MM-DD
    pub production_total: i64,
    pub reading_count: i32,
    pub reset_count: i32,
    pub runs_started: i32,
    pub runs_closed: i32,
}

/// Raw OK/NOK counter snapshot from the legacy PLC firmware. Append-only,
/// no run tracking; increments are computed against the previous snapshot
/// for the same machine with noise handling disabled.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub machine_id: ObjectId,
    pub ok_value: i64,
    pub nok_value: i64,
    pub model_id: Option<ObjectId>,
    pub ok_increment: i64,
    pub nok_increment: i64,
    pub timestamp: bson::DateTime,
}

impl CounterSnapshot {
    pub fn total_units(&self) -> i64 {
        self.ok_value + self.nok_value
    }

    pub fn quality_percent(&self) -> f64 {
        if self.total_units() > 0 {
            self.ok_value as f64 / self.total_units() as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn defect_percent(&self) -> f64 {
        if self.total_units() > 0 {
            self.nok_value as f64 / self.total_units() as f64 * 100.0
        } else {
            0.0
        }
    }
}

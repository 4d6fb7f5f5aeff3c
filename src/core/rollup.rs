//! Hourly and daily summary rollups. Key derivation plus the seed/merge
//! rules, shared by both store backends so they cannot drift apart.

use crate::models::{DailySummary, HourlySummary};
use bson::oid::ObjectId;
use chrono::{DateTime, Timelike, Utc};

/// What one processed reading contributes to its time buckets.
#[derive(Debug, Clone, Copy)]
pub struct ReadingContribution {
    pub value: i64,
    pub increment: i64,
    pub is_reset: bool,
    pub run_started: bool,
    pub run_closed: bool,
}

pub fn bucket_date(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

pub fn bucket_hour(now: DateTime<Utc>) -> i32 {
    now.hour() as i32
}

pub fn seed_hourly(
    device_id: ObjectId,
    product_id: Option<ObjectId>,
    date: &str,
    hour: i32,
    c: &ReadingContribution,
) -> HourlySummary {
    HourlySummary {
        id: ObjectId::new(),
        device_id,
        product_id,
        date: date.to_string(),
        hour,
        production_total: c.increment,
        reading_count: 1,
        reset_count: if c.is_reset { 1 } else { 0 },
        first_value: c.value,
        last_value: c.value,
        min_value: c.value,
        max_value: c.value,
    }
}

pub fn apply_hourly(summary: &mut HourlySummary, product_id: Option<ObjectId>, c: &ReadingContribution) {
    summary.production_total += c.increment;
    summary.reading_count += 1;
    if c.is_reset {
        summary.reset_count += 1;
    }
    summary.last_value = c.value;
    summary.min_value = summary.min_value.min(c.value);
    summary.max_value = summary.max_value.max(c.value);
    summary.product_id = product_id;
}

pub fn seed_daily(
    device_id: ObjectId,
    product_id: Option<ObjectId>,
    date: &str,
    c: &ReadingContribution,
) -> DailySummary {
    DailySummary {
        id: ObjectId::new(),
        device_id,
        product_id,
        date: date.to_string(),
        production_total: c.increment,
        reading_count: 1,
        reset_count: if c.is_reset { 1 } else { 0 },
        runs_started: if c.run_started { 1 } else { 0 },
        runs_closed: if c.run_closed { 1 } else { 0 },
    }
}

pub fn apply_daily(summary: &mut DailySummary, product_id: Option<ObjectId>, c: &ReadingContribution) {
    summary.production_total += c.increment;
    summary.reading_count += 1;
    if c.is_reset {
        summary.reset_count += 1;
    }
    if c.run_started {
        summary.runs_started += 1;
    }
    if c.run_closed {
        summary.runs_closed += 1;
    }
    summary.product_id = product_id;
}

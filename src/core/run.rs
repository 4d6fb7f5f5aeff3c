//! Run tracker. Pure state transitions over the active production run of
//! one device; persistence is the orchestrator's job.

use crate::core::classify::{classify, Classification, ReadingKind};
use crate::models::{ProductionRun, RunState};
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};

/// Result of advancing a device's run state by one reading.
#[derive(Debug, Clone)]
pub struct Transition {
    /// The run the reading belongs to, with this reading already applied.
    pub run: ProductionRun,
    /// Previous run closed by a product change, to be persisted in the
    /// same unit of work.
    pub closed: Option<ProductionRun>,
    pub classification: Classification,
    /// Counter value the delta was computed against (None on baseline).
    pub previous_value: Option<i64>,
    pub was_created: bool,
    pub was_replaced: bool,
}

fn open_run(
    device_id: ObjectId,
    product_id: Option<ObjectId>,
    value: i64,
    now: DateTime<Utc>,
) -> ProductionRun {
    ProductionRun {
        id: ObjectId::new(),
        device_id,
        product_id,
        start_time: bson::DateTime::from_chrono(now),
        end_time: None,
        initial_value: value,
        final_value: value,
        last_value: value,
        production_total: 0,
        reset_count: 0,
        reading_count: 1, // the baseline reading counts
        state: RunState::Active,
        version: 0,
    }
}

fn baseline() -> Classification {
    Classification {
        kind: ReadingKind::Increment,
        delta: 0,
        increment: 0,
    }
}

/// Advance the run state of `device_id` by one reading.
///
/// No active run opens one; a product mismatch closes the active run and
/// opens a fresh one in the same transition; otherwise the reading is
/// classified against the run's last value and folded in.
pub fn advance(
    active: Option<ProductionRun>,
    device_id: ObjectId,
    product_id: Option<ObjectId>,
    value: i64,
    now: DateTime<Utc>,
    noise_threshold: i64,
) -> Transition {
    let mut run = match active {
        None => {
            return Transition {
                run: open_run(device_id, product_id, value, now),
                closed: None,
                classification: baseline(),
                previous_value: None,
                was_created: true,
                was_replaced: false,
            }
        }
        Some(run) if run.product_id != product_id => {
            let mut closed = run;
            closed.end_time = Some(bson::DateTime::from_chrono(now));
            closed.state = RunState::Closed;

            return Transition {
                run: open_run(device_id, product_id, value, now),
                closed: Some(closed),
                classification: baseline(),
                previous_value: None,
                was_created: true,
                was_replaced: true,
            };
        }
        Some(run) => run,
    };

    let previous = run.last_value;
    let classification = classify(Some(previous), value, noise_threshold);

    match classification.kind {
        ReadingKind::Increment => {
            run.production_total += classification.increment;
            run.last_value = value;
            run.final_value = value;
        }
        ReadingKind::Reset => {
            run.reset_count += 1;
            run.last_value = value;
            run.final_value = value;
        }
        ReadingKind::Noise => {
            // Jitter floor advances so the next delta is computed against
            // the latest value; final_value keeps the last real count.
            run.last_value = value;
        }
    }
    run.reading_count += 1;

    Transition {
        run,
        closed: None,
        classification,
        previous_value: Some(previous),
        was_created: false,
        was_replaced: false,
    }
}

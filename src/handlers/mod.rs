pub mod counter_handlers;

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
            counter_handlers::ingest::ingest_reading_handler,
            counter_handlers::ingest::plc_reading_handler,
            counter_handlers::runs::device_runs_handler,
            counter_handlers::runs::active_run_handler,
            counter_handlers::runs::run_readings_handler,
            counter_handlers::history::device_history_handler,
            counter_handlers::history::recent_readings_handler,
            counter_handlers::snapshots::ingest_snapshot_handler,
            counter_handlers::snapshots::recent_snapshots_handler
        )
    )
]
pub struct ProdlineApi;

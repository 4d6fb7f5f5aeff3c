use crate::errors::{AppError, ErrorType};
use crate::utils::{
    utils_functions::{clamp_limit, parse_object_id, parse_optional_time},
    utils_models::{ReadingDto, RunDto, RunReadingsQueries, RunsQueries},
};
use crate::AppContext;
use std::sync::Arc;

#[utoipa::path(
        get,
        path = "api/counters/devices/{device_id}/runs",
        params(RunsQueries),
        responses(
            (status = 200, description = "Runs for the device, newest first", body = [RunDto]),
            (status = 404, description = "Device not found", body = String),
            (status = 500, description = "Internal Server Error", body = String),
        )
    )
]
pub async fn device_runs_handler(
    device_id: String,
    opts: RunsQueries,
    ctx: Arc<AppContext>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let id = parse_object_id(&device_id, "device").map_err(warp::reject::custom)?;
    let device = ctx
        .store
        .find_device(id)
        .await
        .map_err(warp::reject::custom)?
        .ok_or_else(|| {
            warp::reject::custom(AppError::new("device not found", ErrorType::NotFound))
        })?;

    let from = parse_optional_time(&opts.from).map_err(warp::reject::custom)?;
    let to = parse_optional_time(&opts.to).map_err(warp::reject::custom)?;
    let limit = clamp_limit(opts.limit, 50, 200);

    let runs = ctx
        .store
        .runs_for_device(device.id, from, to, limit)
        .await
        .map_err(warp::reject::custom)?;
    let runs: Vec<RunDto> = runs.into_iter().map(RunDto::from).collect();

    Ok(warp::reply::json(&runs))
}

#[utoipa::path(
        get,
        path = "api/counters/devices/{device_id}/runs/active",
        responses(
            (status = 200, description = "The device's active run", body = RunDto),
            (status = 404, description = "Device not found or no active run", body = String),
            (status = 500, description = "Internal Server Error", body = String),
        )
    )
]
pub async fn active_run_handler(
    device_id: String,
    ctx: Arc<AppContext>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let id = parse_object_id(&device_id, "device").map_err(warp::reject::custom)?;
    let device = ctx
        .store
        .find_device(id)
        .await
        .map_err(warp::reject::custom)?
        .ok_or_else(|| {
            warp::reject::custom(AppError::new("device not found", ErrorType::NotFound))
        })?;

    let run = ctx
        .store
        .find_active_run(device.id)
        .await
        .map_err(warp::reject::custom)?
        .ok_or_else(|| {
            warp::reject::custom(AppError::new(
                "device has no active run",
                ErrorType::NotFound,
            ))
        })?;

    Ok(warp::reply::json(&RunDto::from(run)))
}

#[utoipa::path(
        get,
        path = "api/counters/runs/{run_id}/readings",
        params(RunReadingsQueries),
        responses(
            (status = 200, description = "Ledger entries of the run, oldest first", body = [ReadingDto]),
            (status = 400, description = "Malformed run id", body = String),
            (status = 500, description = "Internal Server Error", body = String),
        )
    )
]
pub async fn run_readings_handler(
    run_id: String,
    opts: RunReadingsQueries,
    ctx: Arc<AppContext>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let id = parse_object_id(&run_id, "run").map_err(warp::reject::custom)?;
    let limit = clamp_limit(opts.limit, 1000, 1000);

    let readings = ctx
        .store
        .readings_for_run(id, limit)
        .await
        .map_err(warp::reject::custom)?;
    let readings: Vec<ReadingDto> = readings.into_iter().map(ReadingDto::from).collect();

    Ok(warp::reply::json(&readings))
}

use crate::core::rollup::bucket_date;
use crate::errors::{AppError, ErrorType};
use crate::utils::{
    utils_functions::{clamp_limit, parse_object_id, parse_time_range},
    utils_models::{
        HistoryPoint, HistoryQueries, HistoryResponse, ReadingPointDto, RealtimeResponse,
        RecentQueries, RunDto,
    },
};
use crate::AppContext;
use chrono::{Duration, Utc};
use std::sync::Arc;

#[utoipa::path(
        get,
        path = "api/counters/devices/{device_id}/history",
        params(HistoryQueries),
        responses(
            (status = 200, description = "Rollup points for the window, oldest first", body = HistoryResponse),
            (status = 400, description = "Bad window or granularity", body = String),
            (status = 404, description = "Device not found", body = String),
            (status = 500, description = "Internal Server Error", body = String),
        )
    )
]
pub async fn device_history_handler(
    device_id: String,
    opts: HistoryQueries,
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

    let (from, to) = parse_time_range(&opts.from, &opts.to, 7).map_err(warp::reject::custom)?;
    let from_date = bucket_date(from);
    let to_date = bucket_date(to);

    let granularity = opts.granularity.as_deref().unwrap_or("hour");
    let points = match granularity {
        "hour" => {
            let rows = ctx
                .store
                .hourly_range(device.id, &from_date, &to_date)
                .await
                .map_err(warp::reject::custom)?;
            rows.into_iter()
                .map(|row| HistoryPoint {
                    date: row.date,
                    hour: Some(row.hour),
                    production: row.production_total,
                    resets: row.reset_count,
                    readings: row.reading_count,
                    first_value: Some(row.first_value),
                    last_value: Some(row.last_value),
                })
                .collect::<Vec<_>>()
        }
        "day" => {
            let rows = ctx
                .store
                .daily_range(device.id, &from_date, &to_date)
                .await
                .map_err(warp::reject::custom)?;
            rows.into_iter()
                .map(|row| HistoryPoint {
                    date: row.date,
                    hour: None,
                    production: row.production_total,
                    resets: row.reset_count,
                    readings: row.reading_count,
                    first_value: None,
                    last_value: None,
                })
                .collect::<Vec<_>>()
        }
        other => {
            return Err(warp::reject::custom(AppError::new(
                format!("granularity '{}' is not supported, use 'hour' or 'day'", other).as_str(),
                ErrorType::BadRequest,
            )))
        }
    };

    let total_production: i64 = points.iter().map(|p| p.production).sum();
    let total_resets: i32 = points.iter().map(|p| p.resets).sum();

    Ok(warp::reply::json(&HistoryResponse {
        device_id: device.id.to_hex(),
        device_name: device.name,
        from: from_date,
        to: to_date,
        granularity: granularity.to_string(),
        points,
        total_production,
        total_resets,
    }))
}

#[utoipa::path(
        get,
        path = "api/counters/devices/{device_id}/readings/recent",
        params(RecentQueries),
        responses(
            (status = 200, description = "Live tail of the device's ledger", body = RealtimeResponse),
            (status = 404, description = "Device not found", body = String),
            (status = 500, description = "Internal Server Error", body = String),
        )
    )
]
pub async fn recent_readings_handler(
    device_id: String,
    opts: RecentQueries,
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

    // Window capped at one day, the live dashboard never needs more.
    let minutes = clamp_limit(opts.minutes, 120, 1440);
    let since = Utc::now() - Duration::minutes(minutes);

    let readings = ctx
        .store
        .readings_since(device.id, since)
        .await
        .map_err(warp::reject::custom)?;
    let active_run = ctx
        .store
        .find_active_run(device.id)
        .await
        .map_err(warp::reject::custom)?;

    Ok(warp::reply::json(&RealtimeResponse {
        device_id: device.id.to_hex(),
        device_name: device.name,
        active_run: active_run.map(RunDto::from),
        readings: readings.iter().map(ReadingPointDto::from).collect(),
    }))
}

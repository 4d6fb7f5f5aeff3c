use crate::errors::ErrorType;
use crate::ingest;
use crate::utils::{
    utils_functions::clamp_limit,
    utils_models::{SnapshotDto, SnapshotRequest, SnapshotResponse, SnapshotsQueries},
};
use crate::AppContext;
use std::sync::Arc;
use warp::http::StatusCode;

#[utoipa::path(
        post,
        path = "api/counters/snapshots",
        request_body = SnapshotRequest,
        responses(
            (status = 200, description = "Snapshot recorded", body = SnapshotResponse),
            (status = 400, description = "Unknown machine or negative counters", body = SnapshotResponse),
            (status = 500, description = "Internal Server Error", body = String),
        )
    )
]
pub async fn ingest_snapshot_handler(
    body: SnapshotRequest,
    ctx: Arc<AppContext>,
) -> Result<impl warp::Reply, warp::Rejection> {
    match ingest::ingest_snapshot(ctx.store.as_ref(), &body.machine, body.ok, body.nok, &body.model)
        .await
    {
        Ok(response) => Ok(warp::reply::with_status(
            warp::reply::json(&response),
            StatusCode::OK,
        )),
        Err(err) if err.err_type == ErrorType::BadRequest => Ok(warp::reply::with_status(
            warp::reply::json(&SnapshotResponse::failure(&err.message)),
            StatusCode::BAD_REQUEST,
        )),
        Err(err) => Err(warp::reject::custom(err)),
    }
}

#[utoipa::path(
        get,
        path = "api/counters/snapshots/recent",
        params(SnapshotsQueries),
        responses(
            (status = 200, description = "Latest snapshots across machines, newest first", body = [SnapshotDto]),
            (status = 500, description = "Internal Server Error", body = String),
        )
    )
]
pub async fn recent_snapshots_handler(
    opts: SnapshotsQueries,
    ctx: Arc<AppContext>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let limit = clamp_limit(opts.limit, 10, 100);

    let snapshots = ctx
        .store
        .recent_snapshots(limit)
        .await
        .map_err(warp::reject::custom)?;
    let snapshots: Vec<SnapshotDto> = snapshots.into_iter().map(SnapshotDto::from).collect();

    Ok(warp::reply::json(&snapshots))
}

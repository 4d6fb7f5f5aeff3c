use crate::errors::ErrorType;
use crate::ingest;
use crate::utils::utils_models::{IngestReadingRequest, PlcReadingQuery, ReadingResponse};
use crate::AppContext;
use std::sync::Arc;
use warp::http::StatusCode;

#[utoipa::path(
        post,
        path = "api/counters/readings",
        request_body = IngestReadingRequest,
        responses(
            (status = 200, description = "Reading processed", body = ReadingResponse),
            (status = 400, description = "Unknown device or product, or invalid value", body = ReadingResponse),
            (status = 500, description = "Internal Server Error", body = String),
        )
    )
]
pub async fn ingest_reading_handler(
    body: IngestReadingRequest,
    ctx: Arc<AppContext>,
) -> Result<impl warp::Reply, warp::Rejection> {
    process(ctx, &body.device, &body.product, body.value).await
}

// GET variant of the same ingestion for PLC firmwares that cannot issue
// POSTs. Ex: /api/counters/readings/ingest?device=CNT-07&product=P-100&value=1234
#[utoipa::path(
        get,
        path = "api/counters/readings/ingest",
        params(PlcReadingQuery),
        responses(
            (status = 200, description = "Reading processed", body = ReadingResponse),
            (status = 400, description = "Malformed query or unknown device/product", body = ReadingResponse),
            (status = 500, description = "Internal Server Error", body = String),
        )
    )
]
pub async fn plc_reading_handler(
    raw_query: String,
    ctx: Arc<AppContext>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let query: PlcReadingQuery = match serde_qs::from_str(&raw_query) {
        Ok(query) => query,
        Err(err) => {
            let response = ReadingResponse::failure(format!("invalid query: {}", err).as_str());
            return Ok(warp::reply::with_status(
                warp::reply::json(&response),
                StatusCode::BAD_REQUEST,
            ));
        }
    };

    process(ctx, &query.device, &query.product, query.value).await
}

async fn process(
    ctx: Arc<AppContext>,
    device: &str,
    product: &str,
    value: i64,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, warp::Rejection> {
    match ingest::ingest_reading(
        ctx.store.as_ref(),
        &ctx.locks,
        ctx.settings.noise_threshold,
        device,
        product,
        value,
    )
    .await
    {
        Ok(response) => Ok(warp::reply::with_status(
            warp::reply::json(&response),
            StatusCode::OK,
        )),
        // Unknown device/product and bad values answer in-band so PLCs
        // get a body they can log, not just a status code.
        Err(err) if err.err_type == ErrorType::BadRequest => Ok(warp::reply::with_status(
            warp::reply::json(&ReadingResponse::failure(&err.message)),
            StatusCode::BAD_REQUEST,
        )),
        Err(err) => Err(warp::reject::custom(err)),
    }
}

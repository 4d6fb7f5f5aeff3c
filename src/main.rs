mod config;
mod core;
mod db;
mod errors;
mod handlers;
mod ingest;
mod logger;
mod models;
mod store;
mod swagger;
mod utils;

use config::Settings;
use db::get_db;
use handlers::counter_handlers::{history, ingest as ingest_handlers, runs, snapshots};
use ingest::DeviceLocks;
use std::sync::Arc;
use store::{mongo::MongoStore, CounterStore};
use utoipa::OpenApi;
use warp::{self, Filter};

pub struct AppContext {
    pub store: Arc<dyn CounterStore>,
    pub locks: DeviceLocks,
    pub settings: Settings,
}

#[tokio::main]
async fn main() -> mongodb::error::Result<()> {
    logger::start_log();

    let settings = Settings::from_env().expect("invalid configuration");
    let doc_config = swagger::doc_config();
    let db = get_db().await?;

    let ctx = Arc::new(AppContext {
        store: Arc::new(MongoStore::new(db)),
        locks: DeviceLocks::new(),
        settings: settings.clone(),
    });

    let root = warp::path::end().map(|| "Welcome to the Prodline api");

    let api_doc = warp::path("api-doc.json")
        .and(warp::get())
        .map(|| warp::reply::json(&swagger::ProdlineDoc::openapi()));

    let swagger_ui = warp::path("docs")
        .and(warp::get())
        .and(warp::path::full())
        .and(warp::path::tail())
        .and(warp::any().map(move || doc_config.clone()))
        .and_then(swagger::serve_swagger);

    let ingest_reading_route = warp::path!("api" / "counters" / "readings")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx(ctx.clone()))
        .and_then(ingest_handlers::ingest_reading_handler);

    let plc_reading_route = warp::path!("api" / "counters" / "readings" / "ingest")
        .and(warp::get())
        .and(warp::query::raw())
        .and(with_ctx(ctx.clone()))
        .and_then(ingest_handlers::plc_reading_handler);

    let device_runs_route = warp::path!("api" / "counters" / "devices" / String / "runs")
        .and(warp::get())
        .and(warp::query::<utils::utils_models::RunsQueries>())
        .and(with_ctx(ctx.clone()))
        .and_then(runs::device_runs_handler);

    let active_run_route = warp::path!("api" / "counters" / "devices" / String / "runs" / "active")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(runs::active_run_handler);

    let run_readings_route = warp::path!("api" / "counters" / "runs" / String / "readings")
        .and(warp::get())
        .and(warp::query::<utils::utils_models::RunReadingsQueries>())
        .and(with_ctx(ctx.clone()))
        .and_then(runs::run_readings_handler);

    let history_route = warp::path!("api" / "counters" / "devices" / String / "history")
        .and(warp::get())
        .and(warp::query::<utils::utils_models::HistoryQueries>())
        .and(with_ctx(ctx.clone()))
        .and_then(history::device_history_handler);

    let recent_readings_route =
        warp::path!("api" / "counters" / "devices" / String / "readings" / "recent")
            .and(warp::get())
            .and(warp::query::<utils::utils_models::RecentQueries>())
            .and(with_ctx(ctx.clone()))
            .and_then(history::recent_readings_handler);

    let ingest_snapshot_route = warp::path!("api" / "counters" / "snapshots")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx(ctx.clone()))
        .and_then(snapshots::ingest_snapshot_handler);

    let recent_snapshots_route = warp::path!("api" / "counters" / "snapshots" / "recent")
        .and(warp::get())
        .and(warp::query::<utils::utils_models::SnapshotsQueries>())
        .and(with_ctx(ctx.clone()))
        .and_then(snapshots::recent_snapshots_handler);

    let cors = if settings.allowed_origins.iter().any(|origin| origin == "*") {
        warp::cors().allow_any_origin()
    } else {
        warp::cors().allow_origins(settings.allowed_origins.iter().map(|origin| origin.as_str()))
    }
    .allow_headers(vec!["content-type"])
    .allow_methods(vec!["GET", "POST"]);

    let routes = root
        .or(api_doc)
        .or(swagger_ui)
        .or(ingest_reading_route)
        .or(plc_reading_route)
        .or(active_run_route)
        .or(device_runs_route)
        .or(run_readings_route)
        .or(history_route)
        .or(recent_readings_route)
        .or(recent_snapshots_route)
        .or(ingest_snapshot_route)
        .with(cors)
        .recover(errors::handle_rejection);

    log::info!("listening on port {}", settings.port);
    warp::serve(routes).run(([0, 0, 0, 0], settings.port)).await;

    Ok(())
}

fn with_ctx(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (Arc<AppContext>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

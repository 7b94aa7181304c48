//! Source Harvester: binary entrypoint.
//! Loads config, wires store/providers/rewriter and serves the Axum router.

use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    source_harvester::logging::init_tracing();

    let router = source_harvester::app()
        .await
        .map_err(shuttle_runtime::Error::Custom)?;

    Ok(router.into())
}

//! Polyseek service binary.
//! Boots the Axum HTTP server on Shuttle: settings, pipeline, API and `/metrics`.

use std::sync::Arc;

use polyseek::api::{self, AppState};
use polyseek::config::Settings;
use polyseek::metrics;
use polyseek::pipeline::Pipeline;
use shuttle_axum::ShuttleAxum;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default; `POLYSEEK_LOG_JSON=1` switches to JSON lines.
/// A subscriber installed by the runtime wins, so init failures are ignored.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("polyseek=info,warn"));
    let json = std::env::var("POLYSEEK_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::load()?;
    info!(
        offline = settings.app.offline_mode,
        model = %settings.llm.model,
        "settings loaded"
    );

    let pipeline = Arc::new(Pipeline::from_settings(&settings)?);
    let prometheus = metrics::install()?;

    let router = api::router(AppState::new(pipeline), &settings.app)
        .merge(metrics::router(prometheus));

    Ok(router.into())
}

use std::net::SocketAddr;
use tokio::net::TcpListener;

use livebox_server::config::{generate_config_template, Config};
use livebox_server::{db, routes, state, subscriptions, ws};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("livebox_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    tracing::info!("livebox server v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        page_size = config.notify.page_size,
        max_concurrency = config.notify.max_concurrency,
        delete_batch_size = config.notify.delete_batch_size,
        max_delete_retries = config.notify.max_delete_retries,
        ttl_seconds = config.notify.ttl_seconds,
        "Fan-out settings"
    );

    let db = db::init_db(&config.data_dir)?;

    let connections = ws::new_connection_registry();
    let app_state = state::AppState::build(db, connections, &config)?;

    subscriptions::sweep::spawn_ttl_sweep(
        app_state.subscriptions.clone(),
        config.notify.ttl_sweep_interval_secs,
    );

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

use std::sync::Arc;

use codec_flow::api::{ApiServer, ApiServerConfig, AppState};
use codec_flow::config::AppConfig;
use codec_flow::logging;
use codec_flow::session::SessionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();

    // The guard flushes buffered file output on drop.
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;

    tokio::fs::create_dir_all(&config.data_dir).await?;

    tracing::info!(
        data_dir = %config.data_dir.display(),
        codec_root = %config.codec_root.display(),
        "codec-flow starting"
    );

    let sessions = Arc::new(SessionRegistry::from_config(&config));
    let state =
        AppState::new(sessions, &config.data_dir).with_logging_config(Arc::clone(&logging_config));
    let server = ApiServer::new(ApiServerConfig::from(&config), state);

    let cancel_token = server.cancel_token();
    logging_config.start_retention_cleanup(cancel_token.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
        }
        cancel_token.cancel();
    });

    server.run().await?;

    tracing::info!("codec-flow stopped");
    Ok(())
}

use std::sync::Arc;

use anyhow::Context;
use docstore::SqliteStore;
use fcm::{Credentials, FcmClient, FcmConfig, ServiceAccountKey, TokenProvider};
use push_relay::api::{ApiServer, AppState};
use push_relay::config::FcmSettings;
use push_relay::logging::init_logging;
use push_relay::{AppConfig, AppContext, Relay};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guard = init_logging(config.log_dir.as_deref())?;

    tracing::info!("Starting push-relay v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .with_context(|| format!("failed to open {}", config.database_url))?,
    );
    let messaging = Arc::new(build_fcm_client(&config.fcm).await?);

    let ctx = AppContext::new(store, messaging, config.notify.clone());
    let relay = Relay::new(ctx.clone(), &config.escalation)?;

    let cancel_token = CancellationToken::new();
    let mut handles = relay.start(cancel_token.clone());

    let server = ApiServer::new(config.api.clone(), AppState::new(ctx));
    let server_token = cancel_token.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = server.run(server_token).await {
            tracing::error!("API server error: {}", e);
        }
    }));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    cancel_token.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("Task ended abnormally: {}", e);
        }
    }

    tracing::info!("push-relay stopped");
    Ok(())
}

async fn build_fcm_client(settings: &FcmSettings) -> anyhow::Result<FcmClient> {
    let (credentials, key_project) = match (&settings.access_token, &settings.credentials_file) {
        (Some(token), _) => (Credentials::Static(token.clone()), None),
        (None, Some(path)) => {
            let key = ServiceAccountKey::from_file(path).await?;
            let project_id = key.project_id.clone();
            (Credentials::ServiceAccount(key), Some(project_id))
        }
        (None, None) => anyhow::bail!(
            "no push credentials: set FCM_CREDENTIALS_FILE, GOOGLE_APPLICATION_CREDENTIALS or FCM_ACCESS_TOKEN"
        ),
    };

    let project_id = settings
        .project_id
        .clone()
        .or(key_project)
        .context("FCM_PROJECT_ID is required when using an access token")?;

    let mut fcm_config = FcmConfig::new(project_id);
    if let Some(endpoint) = &settings.endpoint {
        fcm_config = fcm_config.with_endpoint(endpoint.clone());
    }
    Ok(FcmClient::new(fcm_config, TokenProvider::new(credentials))?)
}

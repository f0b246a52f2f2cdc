//! Wire a [`ChannelGateway`] from configuration.

use std::{path::Path, sync::Arc, time::Duration};

use {
    parley_config::{ParleyConfig, validate},
    parley_conversations::{SqliteStore, connect, run_migrations},
    parley_media::{FsBlobStore, MediaPipeline},
    parley_responder::{AiResponder, OpenAiCompletionClient, PromptAssets},
    parley_whatsapp_business::GraphApiClient,
    tracing::{info, warn},
};

use crate::{
    directory::ConfigDirectory,
    error::{Context, Error, Result},
    gateway::{ChannelGateway, GatewayServices},
};

/// Open the database, run migrations and build every collaborator.
pub async fn build_gateway(config: &ParleyConfig) -> Result<ChannelGateway> {
    let report = validate(config);
    for diagnostic in &report.diagnostics {
        warn!(path = %diagnostic.path, "{}", diagnostic.message);
    }
    if report.has_errors() {
        return Err(Error::validation(
            "configuration has errors, run `parley config check`",
        ));
    }

    let pool = connect(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    tokio::fs::create_dir_all(&config.storage.root_dir)
        .await
        .with_context(|| format!("creating blob root {}", config.storage.root_dir))?;
    let blobs = FsBlobStore::new(&config.storage.root_dir, &config.storage.public_base_url);
    let media = MediaPipeline::new(Arc::new(blobs), &config.storage.bucket_prefix);

    let channel = GraphApiClient::new(
        &config.whatsapp.base_url,
        &config.whatsapp.api_version,
        Duration::from_secs(config.whatsapp.timeout_secs),
        config.retry,
    )?;

    let responder_cfg = &config.responder;
    let completion = OpenAiCompletionClient::new(
        &responder_cfg.base_url,
        responder_cfg.api_key.clone(),
        &responder_cfg.model,
        Duration::from_secs(responder_cfg.timeout_secs),
        config.retry,
    )?
    .with_sampling(responder_cfg.temperature, responder_cfg.max_tokens);
    let assets = PromptAssets::load(
        responder_cfg.persona_path.as_deref().map(Path::new),
        responder_cfg.knowledge_path.as_deref().map(Path::new),
    )
    .await?;

    info!(
        organizations = config.organizations.len(),
        database = %config.database.url,
        blobs = %config.storage.root_dir,
        model = %responder_cfg.model,
        "gateway wired"
    );
    Ok(ChannelGateway::new(GatewayServices {
        directory: Arc::new(ConfigDirectory::from_config(config)),
        contacts: store.clone(),
        conversations: store.clone(),
        messages: store,
        media: Arc::new(media),
        responder: Arc::new(AiResponder::new(Arc::new(completion), Arc::new(assets))),
        channel: Arc::new(channel),
    }))
}

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use car_advisor::conversation::{ConversationManager, SessionStore};
use car_advisor::llm::{DisabledCompletion, OllamaClient, TextCompletion};
use car_advisor::model::Catalog;
use car_advisor::server;
use car_advisor::settings::Settings;

#[actix_web::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load("Config")?;

    let catalog_path = &settings.data.catalog_file;
    let catalog = Catalog::load_from_file(catalog_path)
        .with_context(|| format!("Failed to load catalog from '{}'", catalog_path))?;
    log::info!(
        "Loaded {} cars ({} in store) from '{}'",
        catalog.len(),
        catalog.available().len(),
        catalog_path
    );

    let completion: Arc<dyn TextCompletion> = if settings.llm.enabled {
        let client = OllamaClient::new(&settings.llm)?;
        log::info!(
            "Using model '{}' at {} (timeout {} ms)",
            client.model(),
            settings.llm.base_url,
            settings.llm.timeout_ms
        );
        Arc::new(client)
    } else {
        log::warn!("Language model disabled, using local fallbacks only");
        Arc::new(DisabledCompletion)
    };

    let manager = web::Data::new(ConversationManager::new(
        Arc::new(catalog),
        completion,
        settings.conversation.clone(),
    ));
    let store = web::Data::new(SessionStore::new(Duration::from_secs(
        settings.conversation.session_ttl_secs,
    )));

    let host = settings.server.host.clone();
    let port = settings.server.port;
    log::info!("Starting server at http://{}:{}", host, port);
    HttpServer::new(move || {
        App::new()
            .app_data(manager.clone())
            .app_data(store.clone())
            .configure(server::configure)
    })
    .bind((host, port))?
    .run()
    .await?;
    Ok(())
}

use anyhow::{Context, Result};
use reunite_alert::{AlertDispatcher, AlertPolicy, LogMessenger, Messenger, TwilioWhatsApp};
use reunite_core::ExtractionPipeline;
use reunite_store::{CaseStore, EmbeddingCipher};
use reunite_vision::OnnxProvider;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("reunited starting");

    let config = config::Config::from_env();
    let thresholds = config
        .thresholds()
        .context("invalid matcher thresholds in configuration")?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.upload_dir)?;

    let cipher = EmbeddingCipher::load_or_create(&config.key_path)
        .context("failed to load embedding key")?;
    let store = CaseStore::open(&config.db_path, cipher)
        .await
        .context("failed to open case database")?;
    tracing::info!(db = %config.db_path.display(), "case database open");

    if let Some((username, password, phone)) = &config.bootstrap_officer {
        store
            .upsert_officer(username, password, phone.as_deref())
            .await?;
        tracing::info!(username, "provisioned officer login");
    }

    // Fail fast on the embedder; individual detectors load on demand.
    let provider = OnnxProvider::load(&config.model_dir)
        .context("failed to load ONNX models")?;
    let pipeline = ExtractionPipeline::new(config.detector_chain.clone());
    tracing::info!(chain = ?pipeline.backends(), "extraction pipeline ready");
    let inference = engine::spawn_inference(provider, pipeline);

    let messenger: Arc<dyn Messenger> = match TwilioWhatsApp::from_env() {
        Ok(twilio) => {
            tracing::info!("Twilio WhatsApp transport configured");
            Arc::new(twilio)
        }
        Err(_) => {
            tracing::warn!("Twilio credentials not set; alerts will only be logged");
            Arc::new(LogMessenger)
        }
    };
    let dispatcher = AlertDispatcher::spawn(messenger, config.alert_queue_depth);

    let sessions = Arc::new(auth::SessionManager::new(config.session_ttl_secs));
    let scan_engine = Arc::new(engine::ScanEngine::new(
        store.clone(),
        inference,
        dispatcher,
        Arc::clone(&sessions),
        thresholds,
        AlertPolicy {
            top_k: config.alert_top_k,
            alert_threshold: config.alert_threshold,
        },
        config.scan_location.clone(),
        config.officer_contact.clone(),
        config.upload_dir.clone(),
    ));

    let service = dbus_interface::RegistryService::new(scan_engine, sessions, store);
    let _connection = zbus::connection::Builder::session()?
        .name("org.reunite.Registry1")?
        .serve_at("/org/reunite/Registry1", service)?
        .build()
        .await
        .context("failed to claim D-Bus name")?;

    tracing::info!("reunited ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("reunited shutting down");

    Ok(())
}

use anyhow::{Context, Result};
use axum::Router;
use image_autorotate::{
    config::{AppConfig, Backend},
    routes,
    services::{
        auth::TokenSource,
        gcs::{self, GcsStorage},
        local_store::LocalStore,
        notifier::Publisher,
        pipeline::Pipeline,
        pubsub::{self, PubSubPublisher},
        rotator::ExifRotator,
        storage::ObjectStorage,
    },
    state::AppState,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{env, io::ErrorKind, path::Path, sync::Arc};
use tokio::{fs, net::TcpListener, sync::mpsc};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    let json_logs =
        env::var("AUTOROTATE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting image-autorotate with config: {:?}", cfg);

    // --- Backend ---
    let mut events = None;
    let (storage, publisher, topic, local): (
        Arc<dyn ObjectStorage>,
        Arc<dyn Publisher>,
        Option<String>,
        Option<LocalStore>,
    ) = match cfg.backend {
        Backend::Gcp => {
            let client = reqwest::Client::new();
            let storage = GcsStorage::new(
                client.clone(),
                cfg.storage_endpoint.clone(),
                token_source(&cfg, &client, &cfg.storage_endpoint, gcs::DEFAULT_ENDPOINT),
            );
            let publisher = PubSubPublisher::new(
                client.clone(),
                cfg.pubsub_endpoint.clone(),
                token_source(&cfg, &client, &cfg.pubsub_endpoint, pubsub::DEFAULT_ENDPOINT),
            );
            let topic = match cfg.notify_topic.as_deref() {
                Some(short) => Some(
                    pubsub::topic_path(short, cfg.project.as_deref()).with_context(|| {
                        format!(
                            "topic `{}` is not fully qualified and no project is configured",
                            short
                        )
                    })?,
                ),
                None => None,
            };
            let storage: Arc<dyn ObjectStorage> = Arc::new(storage);
            let publisher: Arc<dyn Publisher> = Arc::new(publisher);
            (storage, publisher, topic, None)
        }
        Backend::Local => {
            let (tx, rx) = mpsc::unbounded_channel();
            events = Some(rx);
            let store = open_local_store(&cfg).await?.with_finalize_events(tx);
            let storage: Arc<dyn ObjectStorage> = Arc::new(store.clone());
            let publisher: Arc<dyn Publisher> = Arc::new(store.clone());
            (storage, publisher, cfg.notify_topic.clone(), Some(store))
        }
    };

    // --- Staging directory ---
    fs::create_dir_all(&cfg.staging_dir)
        .await
        .with_context(|| format!("creating staging directory {}", cfg.staging_dir.display()))?;

    let pipeline = Arc::new(Pipeline::new(
        storage,
        publisher,
        Arc::new(ExifRotator::new(cfg.jpeg_quality)),
        cfg.staging_dir.clone(),
        topic,
    )?);
    tracing::info!(topic = pipeline.topic(), "pipeline ready");

    // --- In-process trigger for the local backend ---
    if let Some(rx) = events {
        tokio::spawn(pipeline.clone().consume(rx));
    }

    // --- Build router ---
    let state = AppState {
        pipeline,
        local: local.clone(),
    };
    let app: Router = routes::routes::routes(local.is_some()).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Static token when configured, nothing for emulators, the metadata server otherwise.
fn token_source(
    cfg: &AppConfig,
    client: &reqwest::Client,
    endpoint: &str,
    default_endpoint: &str,
) -> Arc<TokenSource> {
    Arc::new(match (&cfg.access_token, endpoint == default_endpoint) {
        (Some(token), _) => TokenSource::Static(token.clone()),
        (None, true) => TokenSource::metadata_server(client.clone()),
        (None, false) => TokenSource::Anonymous,
    })
}

/// Open the SQLite pool, create directories and apply the schema.
async fn open_local_store(cfg: &AppConfig) -> Result<LocalStore> {
    fs::create_dir_all(&cfg.storage_dir)
        .await
        .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;

    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let url = if db_url.contains('?') || db_url.contains(":memory:") {
        db_url.clone()
    } else {
        format!("{}?mode=rwc", db_url)
    };
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    let store = LocalStore::new(Arc::new(db), cfg.storage_dir.clone());
    store.migrate().await.context("applying local schema")?;
    tracing::info!("Local backend ready at {}", cfg.storage_dir);
    Ok(store)
}

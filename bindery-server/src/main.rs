use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bindery_core::{
    ArtifactStore, Converter, MetadataCache, ProviderClient, RedisCache, S3ArtifactStore, S3Config,
};
use bindery_server::{routes, AppState, Config};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "bindery-server")]
#[command(about = "Book retrieval service: fetch, convert, and serve EPUBs from object storage")]
struct Args {
    /// Server port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides HOST)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    clean_scratch(&config.scratch_dir)
        .with_context(|| format!("failed to prepare scratch dir {}", config.scratch_dir.display()))?;
    std::fs::create_dir_all(&config.books_dir)
        .with_context(|| format!("failed to create books dir {}", config.books_dir.display()))?;

    let cache: Option<Arc<dyn MetadataCache>> = match RedisCache::connect(&config.redis_url()).await
    {
        Ok(cache) => Some(Arc::new(cache)),
        Err(err) => {
            warn!(error = %err, "redis unavailable, running without metadata cache");
            None
        }
    };

    let store: Option<Arc<dyn ArtifactStore>> =
        if config.store_access_key.is_empty() || config.store_secret_key.is_empty() {
            warn!("object store credentials not configured, downloads will be rejected");
            None
        } else {
            // A bucket verified absent that cannot be created fails startup;
            // everything else degrades to a warning inside `connect`.
            let store = S3ArtifactStore::connect(S3Config {
                endpoint: config.store_endpoint.clone(),
                access_key: config.store_access_key.clone(),
                secret_key: config.store_secret_key.clone(),
                bucket: config.store_bucket.clone(),
                region: config.store_region.clone(),
                use_ssl: config.store_use_ssl,
            })
            .await
            .context("object store initialization failed")?;
            Some(Arc::new(store))
        };

    let provider = Arc::new(
        ProviderClient::new(&config.provider_base_url, &config.cookies_path)
            .context("failed to build provider client")?,
    );
    let converter = Converter::new(&config.convert_command);

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, cache, store, provider, converter);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("server listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Wipe and recreate the per-process scratch directory so leftover temp
/// artifacts from a previous run never accumulate.
fn clean_scratch(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    std::fs::create_dir_all(dir)
}

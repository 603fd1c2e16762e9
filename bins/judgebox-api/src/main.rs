mod error;
mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use judgebox_common::config::{LogFormat, ServiceConfig};
use judgebox_common::store::{CodeFileStore, Fixtures, MemoryStore, QuestionStore, RedisStore};
use judgebox_engine::{
    Coordinator, CoordinatorSettings, DockerSandbox, LanguageTable, SandboxSettings,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub code_files: Arc<dyn CodeFileStore>,
    pub questions: Arc<dyn QuestionStore>,
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn stores(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<dyn CodeFileStore>, Arc<dyn QuestionStore>)> {
    if let Some(url) = &config.redis_url {
        let redis = Arc::new(
            RedisStore::connect(url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", url))?,
        );
        info!("Connected to Redis: {}", url);
        return Ok((redis.clone(), redis));
    }

    let memory = match &config.fixtures_path {
        Some(path) => {
            let fixtures = Fixtures::load(path)
                .with_context(|| format!("Failed to load fixtures from {}", path.display()))?;
            info!(
                code_files = fixtures.code_files.len(),
                questions = fixtures.questions.len(),
                "Seeded in-memory store"
            );
            MemoryStore::from_fixtures(fixtures)
        }
        None => {
            warn!("No REDIS_URL or JUDGEBOX_FIXTURES set; store starts empty");
            MemoryStore::new()
        }
    };
    let memory = Arc::new(memory);
    Ok((memory.clone(), memory))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("Invalid service configuration")?;
    init_tracing(config.log_format);

    info!("Judgebox API booting...");

    let languages = match &config.languages_path {
        Some(path) => LanguageTable::load(path)
            .with_context(|| format!("Failed to load languages from {}", path.display()))?,
        None => LanguageTable::builtin(),
    };
    for profile in languages.profiles() {
        info!(language = %profile.name, image = %profile.image, "language registered");
    }

    let sandbox = DockerSandbox::connect(SandboxSettings {
        sample_interval: config.sample_interval,
        output_limit_bytes: config.output_limit_bytes,
        scratch_root: config.workspace_root.clone(),
        ..Default::default()
    })
    .context("Failed to connect to Docker")?;
    sandbox.ping().await.context("Docker daemon not reachable")?;
    match sandbox.sweep_orphans().await {
        Ok(0) => {}
        Ok(n) => info!(removed = n, "Removed leftover sandbox containers"),
        Err(e) => warn!(error = %e, "Failed to sweep leftover sandbox containers"),
    }

    let coordinator = Coordinator::new(
        languages,
        Arc::new(sandbox),
        CoordinatorSettings {
            max_concurrency: config.max_concurrency,
            queue_depth: config.queue_depth,
            workspace_root: config.workspace_root.clone(),
        },
    );
    info!(
        max_concurrency = config.max_concurrency,
        queue_depth = config.queue_depth,
        "Coordinator ready"
    );

    let (code_files, questions) = stores(&config).await?;
    let state = Arc::new(AppState {
        coordinator: Arc::new(coordinator),
        code_files,
        questions,
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}

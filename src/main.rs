use std::{process, sync::Arc};

use cachegate::{
    cache::{
        CacheConfig, CacheStore, MemoryStore, RedisStore, bounded, cache_statistics,
        invalidate_cache,
    },
    config::{self, StoreBackend},
    error::AppError,
    infra::{
        error::InfraError,
        http::{self, AdminState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let store = build_store(&settings.store)?;
    let cache_config = settings.cache.to_cache_config();

    match command {
        config::Command::Serve(_) => run_serve(&settings, store, cache_config).await,
        config::Command::Stats(_) => run_stats(store, &cache_config).await,
        config::Command::Invalidate(args) => {
            run_invalidate(store, &cache_config, &args.patterns).await
        }
    }
}

fn build_store(settings: &config::StoreSettings) -> Result<Arc<dyn CacheStore>, AppError> {
    match settings.backend {
        StoreBackend::Memory => {
            info!(target = "cachegate::store", backend = "memory", "using in-process store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let url = settings.redis_url.as_deref().ok_or_else(|| {
                InfraError::configuration("store.redis_url is required for the redis backend")
            })?;
            let store = RedisStore::connect(url, settings.redis_pool_size.get())
                .map_err(|err| InfraError::store(err.to_string()))?;
            info!(
                target = "cachegate::store",
                backend = "redis",
                pool_size = settings.redis_pool_size.get(),
                "using redis store"
            );
            Ok(Arc::new(store))
        }
    }
}

async fn run_serve(
    settings: &config::Settings,
    store: Arc<dyn CacheStore>,
    cache_config: CacheConfig,
) -> Result<(), AppError> {
    if let Err(err) = bounded(cache_config.store_timeout(), store.stats()).await {
        warn!(
            target = "cachegate::serve",
            error = %err,
            "cache store not reachable at startup; requests will pass through uncached"
        );
    }

    let router = http::build_admin_router(AdminState::new(store, cache_config));
    let listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "cachegate::serve",
        addr = %settings.server.admin_addr,
        "cache operations listener ready"
    );

    let grace = settings.server.graceful_shutdown;
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::pin!(server);
    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "cachegate::serve",
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out; exiting"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target = "cachegate::serve", error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!(target = "cachegate::serve", "shutdown signal received");
}

async fn run_stats(store: Arc<dyn CacheStore>, cache_config: &CacheConfig) -> Result<(), AppError> {
    let stats = cache_statistics(store.as_ref(), cache_config.store_timeout()).await?;
    let rendered = serde_json::to_string_pretty(&stats)
        .map_err(|err| AppError::unexpected(format!("failed to render statistics: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn run_invalidate(
    store: Arc<dyn CacheStore>,
    cache_config: &CacheConfig,
    patterns: &[String],
) -> Result<(), AppError> {
    let mut removed = 0;
    for pattern in patterns {
        let count = bounded(
            cache_config.store_timeout(),
            invalidate_cache(store.as_ref(), std::slice::from_ref(pattern)),
        )
        .await?;
        info!(
            target = "cachegate::invalidate",
            pattern = %pattern,
            removed = count,
            "pattern invalidated"
        );
        removed += count;
    }
    println!("{removed}");
    Ok(())
}

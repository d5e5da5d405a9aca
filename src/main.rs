use std::{process, sync::Arc};

use softcache::{
    cache::{
        BackgroundTrigger, CacheConfig, DeferredRefresh, DispatchMode, HandlerRegistry,
        MemoryStore, RefreshDispatcher, SoftExpiryCache,
    },
    config,
    error::AppError,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
        upstream::{HTTP_GET_HANDLER, HttpGetHandler},
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = build_cache(&settings)?;
    let router = http::build_router(HttpState::new(cache));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        addr = %settings.server.addr,
        trigger_path = %settings.cache.trigger_path,
        dispatch = ?settings.cache.dispatch,
        "Softcache listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

fn build_cache(settings: &config::Settings) -> Result<SoftExpiryCache, AppError> {
    let registry = HandlerRegistry::new().with_handler(HTTP_GET_HANDLER, HttpGetHandler::new()?);
    let dispatcher = build_dispatcher(&settings.cache, &settings.trigger_base_url())?;

    Ok(SoftExpiryCache::new(
        Arc::new(MemoryStore::new()),
        registry,
        settings.cache.clone(),
        dispatcher,
    ))
}

fn build_dispatcher(
    cache: &CacheConfig,
    base_url: &str,
) -> Result<Arc<dyn RefreshDispatcher>, AppError> {
    match cache.dispatch {
        DispatchMode::Trigger => {
            let trigger = BackgroundTrigger::new(cache, base_url).map_err(InfraError::from)?;
            info!(endpoint = %trigger.endpoint(), "Refreshes dispatched through trigger endpoint");
            Ok(Arc::new(trigger))
        }
        DispatchMode::Deferred => {
            info!("Refreshes dispatched in-process after each request");
            Ok(Arc::new(DeferredRefresh))
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(err) => {
            warn!(error = %err, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

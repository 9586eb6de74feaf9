use std::{process, sync::Arc};

use resort_cache::{
    application::error::AppError,
    cache::{CacheConfig, CacheKey, ContentCache},
    config,
    infra::{
        error::InfraError,
        http::{self, ReceiverState},
        revalidate::RevalidationDispatcher,
        store, telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(i32::from(error.exit_code()));
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
        config::Command::Revalidate(args) => run_revalidate(settings, args).await,
        config::Command::BumpVersion(args) => run_bump_version(settings, args).await,
        config::Command::Version(args) => run_version(settings, args).await,
        config::Command::Evict(args) => run_evict(settings, args).await,
    }
}

async fn build_cache(settings: &config::Settings) -> Result<ContentCache, AppError> {
    let store = store::connect(&settings.store).await?;
    Ok(ContentCache::new(store, CacheConfig::from(&settings.cache)))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let revalidation = &settings.revalidation;
    let (Some(secret), Some(session_token)) = (
        revalidation.secret.as_deref(),
        revalidation.session_token.as_deref(),
    ) else {
        return Err(InfraError::configuration(
            "serve requires revalidation.secret and revalidation.session_token",
        )
        .into());
    };

    let cache = Arc::new(build_cache(&settings).await?);
    let state = ReceiverState::new(cache, secret, session_token);
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        addr = %settings.server.addr,
        backend = ?settings.store.backend,
        cache_enabled = settings.cache.enabled,
        "Revalidation receiver listening"
    );

    let grace = settings.server.graceful_shutdown;
    let (stopping_tx, stopping_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(());
        },
    );

    let server = tokio::spawn(async move { server.await });
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return finish_server(result),
        _ = stopping_rx => {}
    }

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => finish_server(result),
        Err(_) => {
            warn!(
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

fn finish_server(
    result: Result<Result<(), std::io::Error>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match result {
        Ok(Ok(())) => {
            info!("Revalidation receiver stopped");
            Ok(())
        }
        Ok(Err(err)) => Err(InfraError::from(err).into()),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn run_revalidate(
    settings: config::Settings,
    args: config::RevalidateArgs,
) -> Result<(), AppError> {
    let dispatcher = RevalidationDispatcher::from_settings(&settings.revalidation)
        .map_err(InfraError::from)?
        .ok_or_else(|| AppError::validation("revalidation.endpoint is not configured"))?;

    let outcome = dispatcher.revalidate_tags(&args.tags).await;
    print_json(&outcome)?;

    if outcome.success {
        Ok(())
    } else {
        Err(AppError::unexpected(format!(
            "revalidation failed: {}",
            outcome.message.unwrap_or_default()
        )))
    }
}

async fn run_bump_version(
    settings: config::Settings,
    args: config::NamespaceArgs,
) -> Result<(), AppError> {
    let cache = build_cache(&settings).await?;
    let version = cache.bump_version(args.namespace).await?;
    println!("{} {version}", args.namespace);
    Ok(())
}

async fn run_version(settings: config::Settings, args: config::NamespaceArgs) -> Result<(), AppError> {
    let cache = build_cache(&settings).await?;
    let version = cache.get_version(args.namespace).await?;
    println!("{} {version}", args.namespace);
    Ok(())
}

async fn run_evict(settings: config::Settings, args: config::EvictArgs) -> Result<(), AppError> {
    let cache = build_cache(&settings).await?;
    let mut removed = 0_u64;
    for key in args.keys {
        let key = CacheKey::from(key);
        if cache.invalidate(&key).await? {
            removed += 1;
        } else {
            warn!(cache_key = %key, "Key was not present");
        }
    }
    println!("{removed}");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

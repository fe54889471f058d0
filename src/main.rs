//! Hyper Gallery server binary.
//!
//! Serves the media listing, the password-gated upload form, emoji
//! reactions, and the uploaded files themselves. `migrate heic|mov` runs the
//! one-shot conversion of legacy files already listed in `media.json`.

mod atomic;
mod auth;
mod background;
mod config;
mod convert;
mod document;
mod error;
mod gallery;
mod http;
mod logging;
mod media_store;
mod migrate;
mod pages;
mod reaction_store;
mod react;
mod storage;
mod upload;
mod version;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::auth::AuthConfig;
use crate::background::spawn_background_tasks;
use crate::config::{Args, Command, MEDIA_DOCUMENT, REACTIONS_DOCUMENT};
use crate::convert::Converter;
use crate::http::{CanonicalRedirect, resolve_client_ip};
use crate::media_store::MediaStore;
use crate::reaction_store::ReactionStore;
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

#[tokio::main]
async fn main() -> Result<(), io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let data_dir = PathBuf::from(&args.data_dir);
    let store = Arc::new(MediaStore::new(data_dir.join(MEDIA_DOCUMENT)));
    let storage = Arc::new(Storage::new(PathBuf::from(&args.uploads_dir)));
    let converter = Arc::new(Converter::from_args(&args));

    if let Some(Command::Migrate { format }) = args.command {
        return run_migration(&store, &storage, &converter, format.into()).await;
    }

    tokio::fs::create_dir_all(&data_dir).await?;
    storage.ensure_root().await?;
    let reactions = Arc::new(ReactionStore::new(data_dir.join(REACTIONS_DOCUMENT)));
    let auth_config = Arc::new(AuthConfig::new(
        args.upload_password.clone(),
        Duration::from_secs(args.session_ttl_secs),
    ));
    if auth_config.password.is_none() {
        warn!("UPLOAD_PASSWORD is not set, uploads are locked");
    }
    let upload_config = Arc::new(UploadConfig {
        max_files: args.upload_max_files,
    });
    let redirect = Arc::new(CanonicalRedirect {
        from_host: args.redirect_from_host.clone(),
        canonical_url: args.canonical_url.clone(),
    });
    let body_limit = match args.upload_max_size {
        0 => DefaultBodyLimit::disable(),
        max => DefaultBodyLimit::max(usize::try_from(max).unwrap_or(usize::MAX)),
    };

    let upload_routes = Router::new()
        .route(
            "/upload",
            get(upload::upload_page)
                .post(upload::upload_media)
                .layer(body_limit),
        )
        .route_layer(middleware::from_fn(auth::require_upload_auth));

    let app = Router::new()
        .route("/", get(gallery::list_gallery))
        .route(
            "/upload-auth",
            get(auth::upload_auth_page).post(auth::upload_auth_submit),
        )
        .route("/react", post(react::react))
        .route("/api/version", get(version::get_version_info))
        .merge(upload_routes)
        .nest_service("/uploads", ServeDir::new(storage.root_path()))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(middleware::from_fn(http::canonical_host_redirect))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(store))
        .layer(Extension(reactions))
        .layer(Extension(storage))
        .layer(Extension(converter))
        .layer(Extension(upload_config))
        .layer(Extension(auth_config.clone()))
        .layer(Extension(redirect));

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("Server listening on {}", addr);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(auth_config);
    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn run_migration(
    store: &MediaStore,
    storage: &Storage,
    converter: &Converter,
    format: convert::LegacyFormat,
) -> Result<(), io::Error> {
    info!(format = %format, uploads = ?storage.root_path(), "starting migration");
    let report = migrate::migrate(store, storage, converter, format)
        .await
        .map_err(|err| io::Error::other(err.to_string()))?;
    let summary = serde_json::to_string_pretty(&report).map_err(io::Error::other)?;
    println!("{summary}");
    if !report.is_clean() {
        warn!("migration finished with skipped items");
    }
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

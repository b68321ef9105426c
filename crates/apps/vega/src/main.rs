//! Vega - Gmail push endpoint that mirrors inbox attachments into blob storage
//!
//! This is the main entry point for the Vega service. It wires the mailsync
//! components from the environment, renews the Gmail watch and serves the
//! push and watch-management routes.

use log::{info, warn};
use mailsync::storage::{BlobSink, CursorStore};
use mailsync::{
    BlobBackend, FileBlobSink, GcsBlobSink, GmailClient, HistoryReconciler, MailboxApi,
    NotificationReceiver, ServiceAccountAuth, ServiceAccountKey, ServiceConfig, SqliteCursorStore,
    SubscriptionManager,
};
use std::net::SocketAddr;
use std::sync::Arc;

mod logging;
mod routes;

use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = ServiceConfig::from_env()?;
    info!(
        "Monitoring {} (label {}) for project {}",
        config.identity, config.label, config.project
    );

    let key = ServiceAccountKey::from_file(&config.key_file)?;
    let gmail_auth =
        ServiceAccountAuth::gmail_delegated(key.clone(), &config.identity, config.http_timeout)?;
    let api: Arc<dyn MailboxApi> =
        Arc::new(GmailClient::new(Arc::new(gmail_auth), config.http_timeout));

    ::config::ensure_parent_dir(&config.state_db)?;
    let cursors: Arc<dyn CursorStore> = Arc::new(SqliteCursorStore::new(&config.state_db)?);
    info!("Cursor store at {}", config.state_db.display());

    let blobs: Arc<dyn BlobSink> = match &config.blob_backend {
        BlobBackend::Gcs => {
            let storage_auth = ServiceAccountAuth::storage(key, config.http_timeout)?;
            info!("Uploading attachments to gs://{}", config.bucket);
            Arc::new(GcsBlobSink::new(Arc::new(storage_auth), config.http_timeout))
        }
        BlobBackend::File {
            root,
            compression_level,
        } => {
            info!("Writing attachments under {}", root.display());
            let mut sink = FileBlobSink::new(root)?;
            if let Some(level) = *compression_level {
                info!("Compressing attachments with zstd level {}", level);
                sink = sink.with_compression(level);
            }
            Arc::new(sink)
        }
    };

    let reconciler = Arc::new(HistoryReconciler::new(
        Arc::clone(&api),
        cursors,
        blobs,
        config.reconcile_options(),
    )?);
    let receiver = NotificationReceiver::new(config.identity.clone(), Arc::clone(&reconciler));
    let subscriptions = Arc::new(SubscriptionManager::new(
        api,
        reconciler,
        config.identity.clone(),
        config.project.clone(),
        config.topic.clone(),
        config.label.clone(),
    ));

    // Watches lapse after a week; renew on every start
    let startup = Arc::clone(&subscriptions);
    match tokio::task::spawn_blocking(move || startup.activate()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Startup watch renewal failed, continuing: {}", e),
        Err(e) => warn!("Startup watch renewal task failed, continuing: {}", e),
    }

    let app = routes::router(AppState {
        receiver: Arc::new(receiver),
        subscriptions,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM (Cloud Run stops instances with SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down");
}

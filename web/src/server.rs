//! Listener binding, serving and process shutdown.

use axum::Router;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Bind every address in `addrs`.
///
/// # Errors
///
/// Returns the first bind failure.
pub async fn bind_all(addrs: &[String]) -> std::io::Result<Vec<TcpListener>> {
    let mut listeners = Vec::with_capacity(addrs.len());
    for addr in addrs {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(address = %addr, "Listening");
        listeners.push(listener);
    }
    Ok(listeners)
}

/// Serve `app` on each listener until `shutdown` fires, then stop accepting
/// and let in-flight requests finish.
#[must_use]
pub fn spawn_servers(
    listeners: Vec<TcpListener>,
    app: &Router,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    listeners
        .into_iter()
        .map(|listener| {
            let app = app.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                let local = listener
                    .local_addr()
                    .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await;
                match result {
                    Ok(()) => tracing::info!(address = %local, "HTTP server stopped"),
                    Err(e) => tracing::error!(address = %local, error = %e, "HTTP server failed"),
                }
            })
        })
        .collect()
}

/// Wait for SIGINT or SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that signal
/// is never observed.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}

/// Await named background tasks, giving each `timeout` to finish.
pub async fn join_all(handles: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) {
    for (task, handle) in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => tracing::info!(task, "Task stopped gracefully"),
            Ok(Err(e)) => tracing::warn!(task, error = %e, "Task failed"),
            Err(_) => tracing::warn!(task, "Task shutdown timed out"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn serves_until_shutdown() {
        let listeners = bind_all(&["127.0.0.1:0".to_string()]).await.unwrap();
        let (shutdown, _) = broadcast::channel(1);
        let app = Router::new().route("/", get(|| async { "ok" }));

        let handles = spawn_servers(listeners, &app, &shutdown);
        assert_eq!(handles.len(), 1);

        shutdown.send(()).unwrap();
        let named = handles.into_iter().map(|h| ("http", h)).collect();
        join_all(named, Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        assert!(bind_all(&["not-an-address".to_string()]).await.is_err());
    }
}

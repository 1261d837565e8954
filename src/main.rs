use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use labdesk::clock::{BusinessClock, Clock};
use labdesk::config::Config;
use labdesk::tenant::TenantManager;
use labdesk::wire;

/// How long in-flight sessions get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves on ctrl-c, or SIGTERM where there is one.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!("no SIGTERM handler ({e}), ctrl-c only"),
        }
    }
    tokio::signal::ctrl_c().await.ok();
}

/// Wait until every connection permit is back or `timeout` passes.
async fn drain(semaphore: &Semaphore, max_connections: usize, timeout: Duration) {
    info!("draining connections...");
    let deadline = tokio::time::Instant::now() + timeout;
    while semaphore.available_permits() < max_connections {
        if tokio::time::Instant::now() >= deadline {
            let remaining = max_connections - semaphore.available_permits();
            warn!("drain timeout, {remaining} connections still open");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all connections drained");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    labdesk::observability::init(config.metrics_port)?;
    let tls_acceptor = config.tls_acceptor()?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let tenant_manager = Arc::new(TenantManager::new(
        config.data_dir.clone(),
        config.compact_threshold,
    ));
    let clock: Arc<dyn Clock> = Arc::new(BusinessClock::new(config.utc_offset));
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("labdesk listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  business timezone: UTC{}", config.utc_offset);
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(labdesk::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(labdesk::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(labdesk::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let tm = tenant_manager.clone();
                let clock = clock.clone();
                let pw = config.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, tm, clock, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(labdesk::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    drain(&semaphore, max_connections, DRAIN_TIMEOUT).await;

    info!("labdesk stopped");
    Ok(())
}

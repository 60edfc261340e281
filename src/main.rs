use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, Instrument};
use ulid::Ulid;

use bookcal::protocol::ServiceDefaults;
use bookcal::wire;
use bookcal::zone::{DayEnd, Zone};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("BOOKCAL_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    bookcal::observability::init(metrics_port);

    let port = std::env::var("BOOKCAL_PORT").unwrap_or_else(|_| "7433".into());
    let bind = std::env::var("BOOKCAL_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let max_connections: usize = std::env::var("BOOKCAL_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);
    let timezone = std::env::var("BOOKCAL_TIMEZONE").unwrap_or_else(|_| "UTC".into());
    let day_end = match std::env::var("BOOKCAL_DAY_END").as_deref() {
        Ok("exclusive") => DayEnd::Exclusive,
        _ => DayEnd::Inclusive,
    };
    let granularity_minutes: u32 = std::env::var("BOOKCAL_GRANULARITY_MINUTES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    let zone = Zone::parse(&timezone)?.with_day_end(day_end);
    bookcal::calendar::validate_granularity(granularity_minutes)?;
    let defaults = Arc::new(ServiceDefaults {
        zone,
        granularity_minutes,
        ..ServiceDefaults::default()
    });
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("bookcal listening on {addr}");
    info!("  timezone: {} ({day_end:?} day end)", zone.name());
    info!("  granularity: {granularity_minutes}m");
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
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
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(bookcal::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                let conn_id = Ulid::new();
                info!(%conn_id, "connection from {peer}");
                metrics::counter!(bookcal::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(bookcal::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let defaults = defaults.clone();

                tokio::spawn(
                    async move {
                        let _permit = permit; // held until connection closes
                        if let Err(e) = wire::process_connection(socket, defaults).await {
                            tracing::error!("connection error from {peer}: {e}");
                        }
                        metrics::gauge!(bookcal::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                    }
                    .instrument(tracing::info_span!("conn", id = %conn_id)),
                );
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("bookcal stopped");
    Ok(())
}

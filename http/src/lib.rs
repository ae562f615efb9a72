//! Exposition endpoint of the exporter.
//!
//! Serves whatever the metric registry currently holds, independently of the collection cadence.

#[macro_use]
extern crate tracing;

pub mod error;
pub mod router;

use router::create_router;
use simplemdm_exporter_gatherer::{
    CycleReport,
    MetricRegistry,
};
use std::{
    net::SocketAddr,
    sync::Arc,
};
use tokio::{
    net::TcpListener,
    sync::watch,
};
use tokio_util::sync::CancellationToken;

/// Bind `address` and serve until `shutdown` is cancelled.
pub async fn serve(
    address: SocketAddr,
    registry: Arc<MetricRegistry>,
    reports: watch::Receiver<Option<CycleReport>>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_router(registry, reports);
    let listener = TcpListener::bind(address).await?;

    info!("listening on http://{}/metrics", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

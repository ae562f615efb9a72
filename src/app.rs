use color_eyre::Result;
use simplemdm_exporter_config::{
    Args,
    CollectorKind,
    Config,
};
use simplemdm_exporter_gatherer::{
    ApiClient,
    AppsCollector,
    Collector,
    DepCollector,
    DevicesCollector,
    EnrollmentsCollector,
    MappingError,
    MetricRegistry,
    Paginator,
    ProfilesCollector,
    PushCertificateCollector,
    Scheduler,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct App {
    config: Config,
    print_config: bool,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let print_config = args.print_config;
        Ok(Self {
            config: Config::new(args)?,
            print_config,
        })
    }

    pub fn log_level(&self) -> &str {
        &self.config.log_level
    }

    /// Poll and serve until SIGINT or SIGTERM. The cycle in flight is finished before returning.
    pub async fn run(self) -> Result<()> {
        if self.print_config {
            print!("{}", self.config.to_redacted_yaml()?);
            return Ok(());
        }

        self.config.validate()?;
        info!(config = ?self.config, "starting simplemdm exporter");

        let client = ApiClient::new(
            self.config.base_url.clone(),
            self.config.api_key.clone(),
            self.config.request_timeout,
        )?;
        let paginator = Paginator::new(Arc::new(client))
            .with_page_size(self.config.page_size)
            .with_max_pages(self.config.max_pages);

        let collectors = self
            .config
            .enabled_collectors()
            .into_iter()
            .map(|kind| build_collector(kind, paginator.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let registry = Arc::new(MetricRegistry::new());
        let scheduler = Scheduler::new(registry.clone(), collectors, self.config.interval)?
            .concurrent(self.config.concurrent_collectors);
        let reports = scheduler.subscribe();

        let shutdown = CancellationToken::new();
        let scheduler = tokio::spawn(scheduler.run(shutdown.clone()));
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                info!("shutdown requested");
                shutdown.cancel();
            }
        });

        let served =
            simplemdm_exporter_http::serve(self.config.listen_address, registry, reports, shutdown.clone()).await;
        shutdown.cancel();
        scheduler.await?;
        served?;

        info!("simplemdm exporter stopped");
        Ok(())
    }
}

fn build_collector(kind: CollectorKind, paginator: Paginator) -> Result<Box<dyn Collector>, MappingError> {
    Ok(match kind {
        CollectorKind::Devices => Box::new(DevicesCollector::new(paginator)?),
        CollectorKind::Apps => Box::new(AppsCollector::new(paginator)?),
        CollectorKind::Enrollments => Box::new(EnrollmentsCollector::new(paginator)?),
        CollectorKind::Dep => Box::new(DepCollector::new(paginator)?),
        CollectorKind::Profiles => Box::new(ProfilesCollector::new(paginator)?),
        CollectorKind::PushCertificate => Box::new(PushCertificateCollector::new(paginator)?),
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                warn!(%error, "cannot listen for ctrl-c");
            }
        }
        _ = terminate => {}
    }
}

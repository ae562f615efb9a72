use super::{
    collector::{
        CollectFuture,
        CollectStats,
        Collector,
        Emitter,
    },
    label_names,
};
use crate::{
    entity::{
        schema,
        Mapper,
    },
    error::{
        CollectError,
        MappingError,
        RegistryError,
    },
    metrics::MetricRegistry,
    paginate::Paginator,
    upstream::fetch_detail,
};

pub const PUSH_CERTIFICATE_INFO: &str = "simplemdm_push_certificate_info";
pub const PUSH_CERTIFICATE_EXPIRY: &str = "simplemdm_push_certificate_expiry_timestamp_seconds";

const SCOPE: &str = "push_certificate";
const PATH: &str = "push_certificate";

/// The account's APNs push certificate, a single object without an id.
pub struct PushCertificateCollector {
    paginator: Paginator,
    certificate: Mapper,
}

impl PushCertificateCollector {
    pub fn new(paginator: Paginator) -> Result<Self, MappingError> {
        Ok(Self {
            paginator,
            certificate: Mapper::new(&schema::PUSH_CERTIFICATE)?,
        })
    }

    #[instrument(level = "debug", skip_all, fields(collector = SCOPE))]
    async fn run(&self, registry: &MetricRegistry) -> Result<CollectStats, CollectError> {
        let mut emit = Emitter::new(registry);
        let data = fetch_detail(self.paginator.upstream(), PATH).await?;
        let certificate = self.certificate.map_with_id(PATH, &data, None)?;

        let labels = self.certificate.label_values(&certificate);
        emit.gauge(PUSH_CERTIFICATE_INFO, &labels, 1.0)?;
        emit.gauge_if(PUSH_CERTIFICATE_EXPIRY, &labels, certificate.number("expires_at"))?;
        emit.entity();

        Ok(emit.finish())
    }
}

impl Collector for PushCertificateCollector {
    fn name(&self) -> &'static str {
        SCOPE
    }

    fn describe(&self, registry: &MetricRegistry) -> Result<(), RegistryError> {
        let labels = label_names(&self.certificate, &[]);
        registry.register_gauge(
            PUSH_CERTIFICATE_INFO,
            "APNs push certificate, value is always 1",
            &labels,
            SCOPE,
        )?;
        registry.register_gauge(
            PUSH_CERTIFICATE_EXPIRY,
            "Expiry time of the APNs push certificate",
            &labels,
            SCOPE,
        )
    }

    fn collect<'a>(&'a self, registry: &'a MetricRegistry) -> CollectFuture<'a> {
        Box::pin(self.run(registry))
    }
}

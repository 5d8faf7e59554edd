//! Log output and optional OTLP trace export for the careergate server.
//!
//! Tracing is exported only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. Spans
//! carry the careergate resource: crate name and version, the git commit it
//! was built from and a per-process instance id.

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const ENV_INSTANCE_ID: &str = "OTEL_SERVICE_INSTANCE_ID";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

// Dependency targets held above the chosen verbosity.
const QUIET_TARGETS: &[&str] = &[
    "hyper=error",
    "tokio=error",
    "h2=warn",
    "tower=warn",
    "sqlx=warn",
    "reqwest=warn",
    "opentelemetry_sdk=warn",
];

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Where and how spans are exported, read from the standard OTLP variables.
#[derive(Debug, PartialEq, Eq)]
struct ExportConfig {
    endpoint: String,
    headers: Vec<(String, String)>,
    instance_id: String,
}

impl ExportConfig {
    /// `None` when no collector endpoint is configured.
    fn from_env() -> Option<Self> {
        let endpoint = var(ENV_ENDPOINT).ok().filter(|ep| !ep.trim().is_empty())?;
        let headers = var(ENV_HEADERS)
            .map(|raw| parse_headers(&raw))
            .unwrap_or_default();
        Some(Self {
            endpoint: normalize_endpoint(endpoint.trim()),
            headers,
            instance_id: var(ENV_INSTANCE_ID).unwrap_or_else(|_| Ulid::new().to_string()),
        })
    }

    /// Host to verify against when the collector is reached over TLS.
    fn tls_domain(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .and_then(|authority| authority.split(':').next())
            .filter(|host| !host.is_empty())
    }

    fn metadata(&self) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            let name = key.to_ascii_lowercase();
            let key = MetadataKey::<Ascii>::from_bytes(name.as_bytes())
                .map_err(|err| anyhow!("invalid OTLP header name {name}: {err}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|err| anyhow!("invalid OTLP header value for {name}: {err}"))?;
            metadata.insert(key, value);
        }
        Ok(metadata)
    }

    fn resource_attributes(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", self.instance_id.clone()),
            KeyValue::new("vcs.revision", crate::GIT_COMMIT_HASH),
        ]
    }
}

/// `key=value` pairs separated by commas; malformed pairs are dropped.
fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

fn init_tracer(config: &ExportConfig) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(domain) = config.tls_domain() {
        let tls = ClientTlsConfig::new()
            .domain_name(domain.to_string())
            .with_native_roots();
        builder = builder.with_tls_config(tls);
    }
    if !config.headers.is_empty() {
        builder = builder.with_metadata(config.metadata()?);
    }

    let exporter = builder.build().context("failed to build OTLP exporter")?;
    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_attributes(config.resource_attributes())
                .build(),
        )
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Filter honoring `RUST_LOG`, defaulting to `level` for careergate events.
fn env_filter(level: Level) -> Result<EnvFilter> {
    QUIET_TARGETS.iter().try_fold(
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy(),
        |filter, directive| -> Result<EnvFilter> {
            Ok(filter.add_directive(directive.parse()?))
        },
    )
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the OTLP exporter or the subscriber cannot be installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let filter = env_filter(verbosity_level.unwrap_or(Level::ERROR))?;
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    if let Some(config) = ExportConfig::from_env() {
        let tracer = init_tracer(&config)?;
        let subscriber = Registry::default()
            .with(fmt_layer)
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
        debug!(endpoint = %config.endpoint, "exporting traces");
    } else {
        tracing::subscriber::set_global_default(Registry::default().with(fmt_layer).with(filter))?;
    }

    Ok(())
}

/// Flush and stop the tracer provider, if one was started.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(endpoint: &str, headers: &[(&str, &str)]) -> ExportConfig {
        ExportConfig {
            endpoint: normalize_endpoint(endpoint),
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            instance_id: "01HZX0000000000000000000000".to_string(),
        }
    }

    #[test]
    fn export_is_off_without_endpoint() {
        temp_env::with_vars(
            [(ENV_ENDPOINT, None::<&str>), (ENV_HEADERS, Some("x-team=careers"))],
            || assert_eq!(ExportConfig::from_env(), None),
        );
        temp_env::with_var(ENV_ENDPOINT, Some("  "), || {
            assert_eq!(ExportConfig::from_env(), None);
        });
    }

    #[test]
    fn export_config_reads_otlp_variables() {
        temp_env::with_vars(
            [
                (ENV_ENDPOINT, Some("collector.careergate.dev:4317/")),
                (ENV_HEADERS, Some("x-team = careers, broken, =orphan")),
                (ENV_INSTANCE_ID, Some("gate-1")),
            ],
            || {
                let config = ExportConfig::from_env().unwrap();
                assert_eq!(config.endpoint, "https://collector.careergate.dev:4317");
                assert_eq!(
                    config.headers,
                    vec![("x-team".to_string(), "careers".to_string())]
                );
                assert_eq!(config.instance_id, "gate-1");
                assert_eq!(config.tls_domain(), Some("collector.careergate.dev"));
            },
        );
    }

    #[test]
    fn plaintext_collector_skips_tls() {
        let config = config("http://localhost:4317", &[]);
        assert_eq!(config.endpoint, "http://localhost:4317");
        assert_eq!(config.tls_domain(), None);
    }

    #[test]
    fn metadata_lowercases_header_names() {
        let config = config("localhost:4317", &[("X-Team", "careers")]);
        let metadata = config.metadata().unwrap();
        assert_eq!(metadata.get("x-team").unwrap(), "careers");
    }

    #[test]
    fn binary_metadata_is_rejected() {
        let config = config("localhost:4317", &[("trace-bin", "YmluYXJ5")]);
        let err = config.metadata().unwrap_err();
        assert!(err.to_string().contains("invalid OTLP header name trace-bin"));
    }

    #[test]
    fn resource_names_the_service() {
        let attributes = config("localhost:4317", &[]).resource_attributes();
        let value = |key: &str| {
            attributes
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.as_str().into_owned())
        };
        assert_eq!(value("service.name").as_deref(), Some("careergate"));
        assert_eq!(
            value("service.version").as_deref(),
            Some(env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(
            value("service.instance.id").as_deref(),
            Some("01HZX0000000000000000000000")
        );
        assert_eq!(value("vcs.revision").as_deref(), Some(crate::GIT_COMMIT_HASH));
    }

    #[test]
    fn env_filter_keeps_dependencies_quiet() {
        temp_env::with_var("RUST_LOG", None::<&str>, || {
            let rendered = env_filter(Level::DEBUG).unwrap().to_string();
            assert!(rendered.contains("debug"));
            assert!(rendered.contains("sqlx=warn"));
            assert!(rendered.contains("hyper=error"));
        });
    }

    #[test]
    fn shutdown_without_provider_is_noop() {
        shutdown_tracer();
    }
}

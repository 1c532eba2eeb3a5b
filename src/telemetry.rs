//! Tracing and OpenTelemetry bootstrap for Tabulon binaries.

use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_NAMESPACE: &str = "service.namespace";
const ATTR_TABULON_DATABASE: &str = "tabulon.database";

/// Parsed telemetry settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub traces_sampler: String,
    pub resource_attributes: Vec<KeyValue>,
    /// `RUST_LOG`-style directive; overrides the binary's log level
    pub log_filter: Option<String>,
    sampler: Sampler,
}

impl TelemetryConfig {
    /// Settings from the process environment
    ///
    /// Environment variables:
    /// - OTEL_SERVICE_NAME (default: the binary's name)
    /// - OTEL_TRACES_SAMPLER / OTEL_TRACES_SAMPLER_ARG
    /// - OTEL_RESOURCE_ATTRIBUTES: comma separated key=value pairs
    /// - TABULAR_DATABASE: recorded as a resource attribute
    /// - RUST_LOG
    pub fn from_env(default_service_name: &str) -> Result<Self> {
        Self::from_lookup(default_service_name, |name| std::env::var(name).ok())
    }

    pub fn from_lookup(
        default_service_name: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let service_name = lookup("OTEL_SERVICE_NAME")
            .unwrap_or_else(|| default_service_name.to_string())
            .trim()
            .to_string();
        if service_name.is_empty() {
            return Err(Error::Config("OTEL_SERVICE_NAME cannot be empty".to_string()));
        }

        let traces_sampler = lookup("OTEL_TRACES_SAMPLER")
            .unwrap_or_else(|| "parentbased_always_on".to_string());
        let sampler = parse_sampler(&traces_sampler, lookup("OTEL_TRACES_SAMPLER_ARG").as_deref())?;

        let mut attrs: BTreeMap<String, String> = BTreeMap::new();
        if let Some(raw) = lookup("OTEL_RESOURCE_ATTRIBUTES") {
            attrs.extend(parse_resource_attributes(&raw)?);
        }
        attrs.insert(ATTR_SERVICE_NAME.to_string(), service_name.clone());
        attrs
            .entry(ATTR_SERVICE_NAMESPACE.to_string())
            .or_insert_with(|| "tabulon".to_string());
        if let Some(database) = lookup("TABULAR_DATABASE").filter(|d| !d.trim().is_empty()) {
            attrs.insert(ATTR_TABULON_DATABASE.to_string(), database);
        }

        Ok(Self {
            service_name,
            traces_sampler,
            resource_attributes: attrs
                .into_iter()
                .map(|(k, v)| KeyValue::new(k, v))
                .collect(),
            log_filter: lookup("RUST_LOG").filter(|f| !f.trim().is_empty()),
            sampler,
        })
    }
}

/// Keeps the SDK providers alive for the life of the process.
pub struct Telemetry {
    config: TelemetryConfig,
    tracer_provider: TracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    /// Install the JSON log subscriber and the global tracer and meter providers.
    pub fn init_for_component(default_service_name: &str, log_level: &str) -> Result<Self> {
        let config = TelemetryConfig::from_env(default_service_name)?;
        let directive = match &config.log_filter {
            Some(filter) => filter.clone(),
            None => parse_log_level(log_level)?.to_string(),
        };
        let filter = EnvFilter::try_new(&directive)
            .map_err(|e| Error::Config(format!("invalid log filter '{directive}': {e}")))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .map_err(|e| Error::Config(format!("failed to initialize log subscriber: {e}")))?;

        let resource =
            Resource::default().merge(&Resource::new(config.resource_attributes.clone()));

        let tracer_provider = TracerProvider::builder()
            .with_config(
                trace::Config::default()
                    .with_sampler(config.sampler.clone())
                    .with_resource(resource.clone()),
            )
            .build();
        let _ = global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
        global::set_meter_provider(meter_provider.clone());
        global::set_text_map_propagator(TraceContextPropagator::new());

        info!(
            service_name = %config.service_name,
            traces_sampler = %config.traces_sampler,
            log_filter = %directive,
            "Telemetry initialized"
        );

        Ok(Self {
            config,
            tracer_provider,
            meter_provider,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let _ = self.meter_provider.shutdown();
        let _ = self.tracer_provider.shutdown();
    }
}

fn parse_log_level(raw: &str) -> Result<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}

fn parse_sampler(name: &str, arg: Option<&str>) -> Result<Sampler> {
    let ratio = || -> Result<f64> {
        let raw = arg.ok_or_else(|| {
            Error::Config("OTEL_TRACES_SAMPLER_ARG is required for ratio samplers".to_string())
        })?;
        match raw.trim().parse::<f64>() {
            Ok(value) if (0.0..=1.0).contains(&value) => Ok(value),
            _ => Err(Error::Config(format!(
                "OTEL_TRACES_SAMPLER_ARG must be a float in [0,1], got '{raw}'"
            ))),
        }
    };

    match name.trim().to_ascii_lowercase().as_str() {
        "always_on" => Ok(Sampler::AlwaysOn),
        "always_off" => Ok(Sampler::AlwaysOff),
        "traceidratio" => Ok(Sampler::TraceIdRatioBased(ratio()?)),
        "parentbased_always_on" => Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOn))),
        "parentbased_always_off" => Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOff))),
        "parentbased_traceidratio" => Ok(Sampler::ParentBased(Box::new(
            Sampler::TraceIdRatioBased(ratio()?),
        ))),
        other => Err(Error::Config(format!(
            "OTEL_TRACES_SAMPLER '{other}' is not supported"
        ))),
    }
}

fn parse_resource_attributes(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(Error::Config(format!(
                "OTEL_RESOURCE_ATTRIBUTES entry '{pair}' is invalid, expected key=value"
            ))),
        })
        .collect()
}

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryProtocol {
    Grpc,
    HttpProtobuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    /// OTLP collector endpoint; traces are only exported when set.
    pub endpoint: Option<String>,
    pub protocol: TelemetryProtocol,
    pub log_format: LogFormat,
}

impl TelemetryConfig {
    pub fn new(service_name: &str, service_version: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            service_version: service_version.to_string(),
            endpoint: None,
            protocol: TelemetryProtocol::Grpc,
            log_format: LogFormat::Pretty,
        }
    }

    /// Reads `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_EXPORTER_OTLP_PROTOCOL`,
    /// `OTEL_SERVICE_NAME`, and `LOG_FORMAT`.
    pub fn from_env(default_service_name: &str, default_service_version: &str) -> Self {
        Self::from_lookup(default_service_name, default_service_version, |key| {
            env::var(key).ok()
        })
    }

    fn from_lookup<F>(default_service_name: &str, default_service_version: &str, get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::new(default_service_name, default_service_version);
        cfg.endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty());
        cfg.protocol = match get("OTEL_EXPORTER_OTLP_PROTOCOL")
            .map(|v| v.to_ascii_lowercase())
            .as_deref()
        {
            Some("http" | "http/protobuf") => TelemetryProtocol::HttpProtobuf,
            _ => TelemetryProtocol::Grpc,
        };
        if let Some(name) = get("OTEL_SERVICE_NAME").filter(|v| !v.trim().is_empty()) {
            cfg.service_name = name;
        }
        cfg.log_format = match get("LOG_FORMAT").map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        cfg
    }

    pub fn exporter_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_disable_export() {
        let cfg = TelemetryConfig::from_lookup("msp-bridge", "0.3.0", lookup(&[]));
        assert_eq!(cfg.service_name, "msp-bridge");
        assert!(!cfg.exporter_enabled());
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = TelemetryConfig::from_lookup(
            "msp-bridge",
            "0.3.0",
            lookup(&[
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318"),
                ("OTEL_EXPORTER_OTLP_PROTOCOL", "http/protobuf"),
                ("OTEL_SERVICE_NAME", "slack-bridge"),
                ("LOG_FORMAT", "JSON"),
            ]),
        );
        assert!(cfg.exporter_enabled());
        assert_eq!(cfg.protocol, TelemetryProtocol::HttpProtobuf);
        assert_eq!(cfg.service_name, "slack-bridge");
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn blank_endpoint_is_ignored() {
        let cfg = TelemetryConfig::from_lookup(
            "msp-bridge",
            "0.3.0",
            lookup(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "  ")]),
        );
        assert!(!cfg.exporter_enabled());
    }
}

//! Static identity attached to all telemetry emitted by this process.

use opentelemetry::KeyValue;

/// Immutable service identity.
///
/// Created once at startup and shared by reference; every span batch and
/// every enriched log record carries the service name from here.
#[derive(Debug, Clone)]
pub struct Resource {
    service_name: String,
}

impl Resource {
    /// Create a resource for the given service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// The service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Convert into the exporter-side resource representation.
    pub fn to_otel(&self) -> opentelemetry_sdk::Resource {
        opentelemetry_sdk::Resource::new(vec![KeyValue::new(
            "service.name",
            self.service_name.clone(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_round_trip() {
        let resource = Resource::new("tumbler-test");
        assert_eq!(resource.service_name(), "tumbler-test");

        let otel = resource.to_otel();
        let value = otel.get(opentelemetry::Key::new("service.name"));
        assert_eq!(value.map(|v| v.to_string()), Some("tumbler-test".to_string()));
    }
}

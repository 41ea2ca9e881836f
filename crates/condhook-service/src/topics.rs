//! Topic naming.

use condhook_rules::TRANSDUCER_PREFIX;

/// Root of all service topics.
pub const SERVICE_PREFIX: &str = "openchirp/service";
/// Root of device endpoints when the framework does not provide one.
pub const DEVICE_PREFIX: &str = "openchirp/device";

/// Topics owned by one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTopics {
    base: String,
}

impl ServiceTopics {
    pub fn new(service_id: &str) -> Self {
        Self {
            base: format!("{}/{}", SERVICE_PREFIX, service_id),
        }
    }

    /// Service status (`Starting`, `Started`, `Shutting down`).
    pub fn status(&self) -> String {
        format!("{}/status", self.base)
    }

    /// Link/update/unlink events from the framework.
    pub fn thing_events(&self) -> String {
        format!("{}/thing/events", self.base)
    }

    /// Per-device link results.
    pub fn thing_status(&self) -> String {
        format!("{}/thing/status", self.base)
    }
}

pub fn default_device_endpoint(device_id: &str) -> String {
    format!("{}/{}", DEVICE_PREFIX, device_id)
}

/// `endpoint` + `/` + `subtopic`, tolerating a trailing slash on the endpoint.
pub fn join(endpoint: &str, subtopic: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), subtopic)
}

/// Subtopic carrying values of `variable`.
pub fn transducer_subtopic(variable: &str) -> String {
    format!("{}/{}", TRANSDUCER_PREFIX, variable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_topics() {
        let topics = ServiceTopics::new("svc1");
        assert_eq!(topics.status(), "openchirp/service/svc1/status");
        assert_eq!(topics.thing_events(), "openchirp/service/svc1/thing/events");
        assert_eq!(topics.thing_status(), "openchirp/service/svc1/thing/status");
    }

    #[test]
    fn test_device_topics() {
        let endpoint = default_device_endpoint("dev1");
        assert_eq!(endpoint, "openchirp/device/dev1");
        assert_eq!(
            join(&endpoint, &transducer_subtopic("temp")),
            "openchirp/device/dev1/transducer/temp"
        );
        assert_eq!(
            join("openchirp/device/dev1/", "transducer/out"),
            "openchirp/device/dev1/transducer/out"
        );
    }
}

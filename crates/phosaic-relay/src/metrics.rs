use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry,
};
use std::sync::Arc;

pub struct RelayMetrics {
    pub connections_open: IntGauge,
    pub registered_subordinates: IntGauge,
    pub registered_coordinators: IntGauge,
    pub registrations: IntCounterVec,
    pub messages_routed: IntCounterVec,
    pub messages_dropped: IntCounterVec,
    pub malformed_frames: IntCounter,
    pub registry: Arc<Registry>,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let connections_open = register_int_gauge_with_registry!(
            "phosaic_relay_connections_open",
            "Number of open signaling connections",
            registry
        )?;

        let registered_subordinates = register_int_gauge_with_registry!(
            "phosaic_relay_registered_subordinates",
            "Number of registered subordinates",
            registry
        )?;

        let registered_coordinators = register_int_gauge_with_registry!(
            "phosaic_relay_registered_coordinators",
            "Number of registered coordinators",
            registry
        )?;

        let registrations = register_int_counter_vec_with_registry!(
            "phosaic_relay_registrations_total",
            "Total number of successful registrations",
            &["role"],
            registry
        )?;

        let messages_routed = register_int_counter_vec_with_registry!(
            "phosaic_relay_messages_routed_total",
            "Total number of forwarded signaling messages",
            &["type"],
            registry
        )?;

        let messages_dropped = register_int_counter_vec_with_registry!(
            "phosaic_relay_messages_dropped_total",
            "Total number of dropped signaling messages",
            &["reason"],
            registry
        )?;

        let malformed_frames = register_int_counter_with_registry!(
            "phosaic_relay_malformed_frames_total",
            "Total number of frames that failed to parse",
            registry
        )?;

        Ok(Self {
            connections_open,
            registered_subordinates,
            registered_coordinators,
            registrations,
            messages_routed,
            messages_dropped,
            malformed_frames,
            registry,
        })
    }

    pub fn export_prometheus(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_includes_labelled_counters() {
        let metrics = RelayMetrics::new().unwrap();
        metrics.messages_dropped.with_label_values(&["unresolved_target"]).inc();
        metrics.connections_open.set(2);

        let text = metrics.export_prometheus().unwrap();
        assert!(text.contains("phosaic_relay_messages_dropped_total{reason=\"unresolved_target\"} 1"));
        assert!(text.contains("phosaic_relay_connections_open 2"));
    }

    #[test]
    fn instances_do_not_share_a_registry() {
        let a = RelayMetrics::new().unwrap();
        let b = RelayMetrics::new().unwrap();
        a.malformed_frames.inc();
        assert_eq!(b.malformed_frames.get(), 0);
    }
}

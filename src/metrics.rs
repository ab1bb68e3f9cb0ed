//! Prometheus metrics, registered on first use in the default registry.

use prometheus::{Encoder, TextEncoder};

pub mod custom {
    use once_cell::sync::Lazy;
    use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

    /// Accepted connections by transport (ldap/ldaps)
    pub static LDAP_CONNECTIONS: Lazy<CounterVec> = Lazy::new(|| {
        register_counter_vec!(
            "ldap_connections_total",
            "Total number of accepted LDAP connections",
            &["transport"]
        )
        .expect("Failed to register ldap_connections counter")
    });

    /// LDAP bind operations counter
    pub static LDAP_BINDS: Lazy<CounterVec> = Lazy::new(|| {
        register_counter_vec!(
            "ldap_bind_operations_total",
            "Total number of LDAP bind operations",
            &["result"]
        )
        .expect("Failed to register ldap_binds counter")
    });

    /// LDAP searches by resolution path and result code
    pub static LDAP_SEARCHES: Lazy<CounterVec> = Lazy::new(|| {
        register_counter_vec!(
            "ldap_search_operations_total",
            "Total number of LDAP search operations",
            &["kind", "result"]
        )
        .expect("Failed to register ldap_searches counter")
    });

    /// Errors reported by the connection loop
    pub static LDAP_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
        register_counter_vec!(
            "ldap_connection_errors_total",
            "Total number of errors reported by LDAP connections",
            &["kind"]
        )
        .expect("Failed to register ldap_errors counter")
    });

    /// Storage operation latency histogram
    pub static STORE_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
        register_histogram_vec!(
            "directory_store_operation_duration_seconds",
            "Duration of directory store operations in seconds",
            &["operation", "result"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
        )
        .expect("Failed to register store_operation_duration histogram")
    });
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

pub fn record_connection(transport: &str) {
    custom::LDAP_CONNECTIONS.with_label_values(&[transport]).inc();
}

/// `result` is the LDAP result code name, e.g. `success` or `invalidCredentials`.
pub fn record_ldap_bind(result: &str) {
    custom::LDAP_BINDS.with_label_values(&[result]).inc();
}

pub fn record_ldap_search(kind: &str, result: &str) {
    custom::LDAP_SEARCHES.with_label_values(&[kind, result]).inc();
}

pub fn record_connection_error(kind: &str) {
    custom::LDAP_ERRORS.with_label_values(&[kind]).inc();
}

pub fn record_store_operation(operation: &str, success: bool, elapsed: std::time::Duration) {
    custom::STORE_OPERATION_DURATION
        .with_label_values(&[operation, outcome(success)])
        .observe(elapsed.as_secs_f64());
}

/// Render the default registry in the Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_are_exported() {
        record_connection("ldap");
        record_ldap_bind("success");
        record_ldap_search("entries", "noSuchObject");
        record_connection_error("decode");
        record_store_operation("entries_by_dn", true, std::time::Duration::from_millis(2));

        let text = gather();
        assert!(text.contains("ldap_connections_total"));
        assert!(text.contains("ldap_bind_operations_total"));
        assert!(text.contains("result=\"noSuchObject\""));
        assert!(text.contains("ldap_connection_errors_total"));
        assert!(text.contains("directory_store_operation_duration_seconds"));
    }
}

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder. Fails if a recorder is already installed.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "db_status_checks_total",
        "Total number of database status checks by resulting status"
    );
    describe_counter!(
        "db_reconnect_attempts_total",
        "Total number of reconnection attempts"
    );
    describe_counter!(
        "db_reconnect_success_total",
        "Total number of successful reconnections"
    );
    describe_counter!(
        "db_errors_total",
        "Total number of analysed database errors"
    );
    describe_gauge!("db_connected", "1 while the database connection is up");
    describe_gauge!(
        "db_inspector_info",
        "Inspector version and build information"
    );

    gauge!("db_inspector_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

pub fn record_status_check(status: &str) {
    counter!("db_status_checks_total", "status" => status.to_string()).increment(1);
}

pub fn record_reconnect_attempt() {
    counter!("db_reconnect_attempts_total").increment(1);
}

pub fn record_reconnect_success() {
    counter!("db_reconnect_success_total").increment(1);
}

/// Record an analysed error
pub fn record_error(category: &str, code: &str) {
    counter!(
        "db_errors_total",
        "category" => category.to_string(),
        "code" => code.to_string(),
    )
    .increment(1);
}

pub fn set_connected(connected: bool) {
    gauge!("db_connected").set(if connected { 1.0 } else { 0.0 });
}

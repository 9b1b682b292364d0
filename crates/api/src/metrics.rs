use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge,
};

pub static USERS_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("ledger_users_created_total", "Users created via the API")
        .expect("users_created counter")
});

pub static DECISIONS_APPENDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ledger_decisions_appended_total",
        "Classifier decisions appended to the ledger"
    )
    .expect("decisions_appended counter")
});

pub static REPORTS_BUILT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ledger_reports_built_total",
        "Leaderboards and streak reports computed, by kind",
        &["kind"]
    )
    .expect("reports_built counter")
});

pub static USERS_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "ledger_users_tracked",
        "Users currently present in the ledger"
    )
    .expect("users_tracked gauge")
});

/// Encodes the default registry in the Prometheus text format.
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let content_type = encoder.format_type().to_string();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((content_type, buffer))
}

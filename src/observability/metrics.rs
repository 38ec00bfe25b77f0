use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub suggestions_total: IntCounterVec,
    pub suggestion_latency_seconds: HistogramVec,
    pub failure_reports_total: IntCounterVec,
    pub pending_compensations: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Assignment commits by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let suggestions_total = IntCounterVec::new(
            Opts::new("suggestions_total", "Partner suggestions by source and outcome"),
            &["source", "outcome"],
        )
        .expect("valid suggestions_total metric");

        let suggestion_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "suggestion_latency_seconds",
                "Latency of partner suggestions in seconds",
            ),
            &["source"],
        )
        .expect("valid suggestion_latency_seconds metric");

        let failure_reports_total = IntCounterVec::new(
            Opts::new("failure_reports_total", "Delivery failure reports by outcome"),
            &["outcome"],
        )
        .expect("valid failure_reports_total metric");

        let pending_compensations = IntGauge::new(
            "pending_compensations",
            "Partner load corrections waiting to be retried",
        )
        .expect("valid pending_compensations metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(suggestions_total.clone()))
            .expect("register suggestions_total");
        registry
            .register(Box::new(suggestion_latency_seconds.clone()))
            .expect("register suggestion_latency_seconds");
        registry
            .register(Box::new(failure_reports_total.clone()))
            .expect("register failure_reports_total");
        registry
            .register(Box::new(pending_compensations.clone()))
            .expect("register pending_compensations");

        Self {
            registry,
            assignments_total,
            suggestions_total,
            suggestion_latency_seconds,
            failure_reports_total,
            pending_compensations,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

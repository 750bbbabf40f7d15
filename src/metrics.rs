use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::model::Run;

/// Render a finished run in the Prometheus text exposition format.
///
/// A fresh registry is built per call so repeated renders never mix runs.
pub fn render(run: &Run) -> prometheus::Result<Vec<u8>> {
    let registry = Registry::new();

    let latency = GaugeVec::new(
        Opts::new(
            "happy_connect_latency_microseconds",
            "TCP connect latency over successful attempts",
        ),
        &["target", "address", "stat"],
    )?;
    registry.register(Box::new(latency.clone()))?;

    let attempts = IntCounterVec::new(
        Opts::new("happy_connect_attempts_total", "Connection attempts by outcome"),
        &["target", "address", "outcome"],
    )?;
    registry.register(Box::new(attempts.clone()))?;

    let throughput = GaugeVec::new(
        Opts::new(
            "happy_throughput_bytes_per_second",
            "Byte rate measured over a kept connection",
        ),
        &["target", "address", "direction"],
    )?;
    registry.register(Box::new(throughput.clone()))?;

    let resolved = GaugeVec::new(
        Opts::new("happy_target_resolved", "1 if the target resolved to any address"),
        &["target"],
    )?;
    registry.register(Box::new(resolved.clone()))?;

    for target in run.targets() {
        let name = format!("{}:{}", target.host, target.port);
        resolved
            .with_label_values(&[name.as_str()])
            .set(if target.is_resolved() { 1.0 } else { 0.0 });

        for ep in &target.endpoints {
            let addr = ep.addr().ip().to_string();
            let labels = |extra: &'static str| [name.as_str(), addr.as_str(), extra];

            if let (Some(min), Some(mean), Some(max)) = (ep.min_us(), ep.mean_us(), ep.max_us()) {
                latency.with_label_values(&labels("min")).set(min as f64);
                latency.with_label_values(&labels("avg")).set(mean);
                latency.with_label_values(&labels("max")).set(max as f64);
            }
            for sample in ep.samples() {
                let outcome = sample.outcome.to_string();
                attempts
                    .with_label_values(&[name.as_str(), addr.as_str(), outcome.as_str()])
                    .inc();
            }
            if let Some(tp) = ep.throughput() {
                throughput.with_label_values(&labels("send")).set(tp.send_rate());
                throughput.with_label_values(&labels("recv")).set(tp.recv_rate());
            }
        }
    }

    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&registry.gather(), &mut buf)?;
    Ok(buf)
}

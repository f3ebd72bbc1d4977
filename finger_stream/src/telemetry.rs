use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Failed to build metrics exporter: {0}")]
pub struct MetricsError(String);

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    streamed_frames: Counter<u64>,
    hands_detected: Gauge<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| MetricsError(e.to_string()))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("finger_stream");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let boundaries = generate_boundaries((5, 25, 45, 505, 1005));

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of inference calls in milliseconds")
            .build();

        let streamed_frames = meter
            .u64_counter("streamed_frames_total")
            .with_description("Frames written to MJPEG clients")
            .build();

        let hands_detected = meter
            .u64_gauge("hands_detected")
            .with_description("Hands found in the latest polled frame")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            streamed_frames,
            hands_detected,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = [KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, operation: &str) {
        let attributes = [KeyValue::new("operation", operation.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_streamed_frame(&self) {
        self.streamed_frames.add(1, &[]);
    }

    pub fn record_hands_detected(&self, count: usize) {
        self.hands_detected.record(count as u64, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_generate_boundaries() {
        let parts = (2, 22, 26, 46, 146);
        let get = generate_boundaries(parts);
        let expected = vec![2.0, 12.0, 22.0, 24.0, 26.0, 46.0, 146.0];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_recorded_metrics_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/predict");
        metrics.record_streamed_frame();
        metrics.record_hands_detected(1);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("requests_total"));
        assert!(text.contains("streamed_frames_total"));
    }
}

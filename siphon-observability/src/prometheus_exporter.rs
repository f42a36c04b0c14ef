use prometheus::{Encoder, TextEncoder};

/// Render prometheus text exposition format from a registry.
pub fn render_metrics(registry: &prometheus::Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or(());
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{IntCounterVec, Opts, Registry};

    #[test]
    fn render_empty_registry_returns_empty_string() {
        let registry = Registry::new();
        let output = render_metrics(&registry);
        assert!(output.is_empty(), "expected no output, got: {output:?}");
    }

    #[test]
    fn render_labelled_counter() {
        let registry = Registry::new();
        let counter = IntCounterVec::new(
            Opts::new("siphon_test_dropped_total", "Dropped test records"),
            &["reason"],
        )
        .unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.with_label_values(&["too_large"]).inc_by(4);

        let output = render_metrics(&registry);
        assert!(output.contains("# TYPE siphon_test_dropped_total counter"));
        assert!(output.contains(r#"siphon_test_dropped_total{reason="too_large"} 4"#));
    }
}

//! Prometheus metrics for the relay and the dashboard feed.

use std::net::SocketAddr;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics() {
    let port: u16 = std::env::var("PIPEDASH_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    println!("[metrics] Attempting to install Prometheus exporter on {}", addr);
    match builder.install() {
        Ok(()) => {
            println!(
                "[metrics] Prometheus exporter installed and listening on http://{}/metrics",
                addr
            );
        }
        Err(e) => {
            println!(
                "[metrics] Prometheus exporter install failed (possibly already installed): {}",
                e
            );
        }
    }
}

/// Relay-side counters and gauges.
pub mod relay {
    use crate::envelope::EnvelopeKind;

    pub fn connection_opened() {
        ::metrics::counter!("pipedash_relay_connections_total").increment(1);
    }

    pub fn envelope_published(kind: EnvelopeKind) {
        ::metrics::counter!("pipedash_relay_envelopes_published_total", "kind" => kind.as_str())
            .increment(1);
    }

    pub fn envelope_rejected() {
        ::metrics::counter!("pipedash_relay_envelopes_rejected_total").increment(1);
    }

    pub fn session_count(count: usize) {
        ::metrics::gauge!("pipedash_relay_sessions").set(count as f64);
    }

    pub fn push_delivered() {
        ::metrics::counter!("pipedash_relay_pushes_delivered_total").increment(1);
    }

    pub fn push_failed() {
        ::metrics::counter!("pipedash_relay_pushes_failed_total").increment(1);
    }
}

/// Dashboard feed counters.
pub mod feed {
    pub fn subscription_opened() {
        ::metrics::counter!("pipedash_feed_subscriptions_total").increment(1);
    }

    pub fn update_streamed() {
        ::metrics::counter!("pipedash_feed_updates_streamed_total").increment(1);
    }
}

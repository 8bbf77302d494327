use crate::LinkStats;
use hb_transport::Counters;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

/// Counter sets appear under the `set` label: `ack`, `noack` and `remote`.
#[derive(Clone)]
pub struct LinkMetrics {
    pub rx: IntGaugeVec,
    pub tx: IntGaugeVec,
    pub rx_missing: IntGaugeVec,
    pub tx_retries: IntGaugeVec,
    pub tx_failed: IntGaugeVec,
    pub missed_outbound: IntGauge,
    pub missed_inbound: IntGauge,
    pub tx_queued: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub link: LinkMetrics,
}

fn gauge_vec(name: &str, help: &str) -> Result<IntGaugeVec, String> {
    IntGaugeVec::new(Opts::new(name, help), &["set"])
        .map_err(|e| format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let link = LinkMetrics {
            rx: gauge_vec("hb_link_rx", "Messages received")?,
            tx: gauge_vec("hb_link_tx", "Messages sent")?,
            rx_missing: gauge_vec("hb_link_rx_missing", "Gaps detected on receive")?,
            tx_retries: gauge_vec("hb_link_tx_retries", "Retransmissions")?,
            tx_failed: gauge_vec("hb_link_tx_failed", "Sends given up on")?,
            missed_outbound: IntGauge::new(
                "hb_link_missed_outbound",
                "Local sends the peer did not count",
            )
            .map_err(|e| format!("metrics init error: {e}"))?,
            missed_inbound: IntGauge::new(
                "hb_link_missed_inbound",
                "Peer sends we did not count",
            )
            .map_err(|e| format!("metrics init error: {e}"))?,
            tx_queued: IntGauge::new("hb_link_tx_queued", "Messages waiting in the transport")
                .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let _ = registry.register(Box::new(link.rx.clone()));
        let _ = registry.register(Box::new(link.tx.clone()));
        let _ = registry.register(Box::new(link.rx_missing.clone()));
        let _ = registry.register(Box::new(link.tx_retries.clone()));
        let _ = registry.register(Box::new(link.tx_failed.clone()));
        let _ = registry.register(Box::new(link.missed_outbound.clone()));
        let _ = registry.register(Box::new(link.missed_inbound.clone()));
        let _ = registry.register(Box::new(link.tx_queued.clone()));
        Ok(Self { registry, link })
    }

    fn set_counters(&self, set: &str, c: &Counters) {
        let m = &self.link;
        m.rx.with_label_values(&[set]).set(i64::from(c.rx));
        m.tx.with_label_values(&[set]).set(i64::from(c.tx));
        m.rx_missing.with_label_values(&[set]).set(i64::from(c.rx_missing));
        m.tx_retries.with_label_values(&[set]).set(i64::from(c.tx_retries));
        m.tx_failed.with_label_values(&[set]).set(i64::from(c.tx_failed));
    }

    pub fn observe(&self, stats: &LinkStats) {
        self.set_counters("ack", &stats.local_ack);
        self.set_counters("noack", &stats.local_noack);
        self.set_counters("remote", &stats.remote);
        self.link.missed_outbound.set(stats.missed_outbound());
        self.link.missed_inbound.set(stats.missed_inbound());
        self.link
            .tx_queued
            .set(i64::try_from(stats.tx_queued).unwrap_or(i64::MAX));
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_exports_sets() {
        let hub = MetricsHub::new().unwrap();
        let stats = LinkStats {
            local_ack: Counters {
                tx: 7,
                ..Default::default()
            },
            remote: Counters {
                rx: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        hub.observe(&stats);
        assert_eq!(hub.link.tx.with_label_values(&["ack"]).get(), 7);
        assert_eq!(hub.link.missed_outbound.get(), 2);
        let text = hub.encode_text();
        assert!(text.contains("hb_link_tx{set=\"ack\"} 7"));
        assert!(text.contains("hb_link_missed_outbound 2"));
    }
}

use hb_transport::Counters;
use serde::Serialize;
use std::fmt;

/// Snapshot of both local counter sets and the last remote mirror.
///
/// The derived loss figures are only meaningful if `remote_refreshed_ms` is recent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub local_ack: Counters,
    pub local_noack: Counters,
    pub remote: Counters,
    /// Transport time of the last counters-sum response, if any arrived.
    pub remote_refreshed_ms: Option<u32>,
    pub tx_queued: usize,
}

impl LinkStats {
    pub fn local_total(&self) -> Counters {
        self.local_ack.sum(&self.local_noack)
    }

    /// Messages we sent that the peer never counted.
    pub fn missed_outbound(&self) -> i64 {
        i64::from(self.local_total().tx) - i64::from(self.remote.rx)
    }

    /// Messages the peer sent that we never counted.
    pub fn missed_inbound(&self) -> i64 {
        i64::from(self.remote.tx) - i64::from(self.local_total().rx)
    }

    pub fn remote_age_ms(&self, now_ms: u32) -> Option<u32> {
        self.remote_refreshed_ms.map(|t| now_ms.wrapping_sub(t))
    }
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self.local_total();
        write!(
            f,
            "Local  RX: {:4} TX: {:4} RXmissing: {:4}    ",
            local.rx, local.tx, local.rx_missing
        )?;
        write!(
            f,
            "Remote RX: {:4} TX: {:4} RXmissing: {:4}    ",
            self.remote.rx, self.remote.tx, self.remote.rx_missing
        )?;
        write!(
            f,
            "Missed Local->Remote {:4} ({:4}) Remote->Local {:4} ({:4})",
            self.missed_outbound(),
            self.remote.rx_missing,
            self.missed_inbound(),
            local.rx_missing
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> LinkStats {
        LinkStats {
            local_ack: Counters {
                tx: 60,
                rx: 30,
                ..Default::default()
            },
            local_noack: Counters {
                tx: 40,
                rx: 18,
                ..Default::default()
            },
            remote: Counters {
                rx: 97,
                tx: 50,
                ..Default::default()
            },
            remote_refreshed_ms: Some(1_000),
            tx_queued: 0,
        }
    }

    #[test]
    fn test_missed_counts() {
        let s = fixture();
        assert_eq!(s.local_total().tx, 100);
        assert_eq!(s.missed_outbound(), 3);
        assert_eq!(s.missed_inbound(), 2);
    }

    #[test]
    fn test_missed_can_go_negative() {
        let s = LinkStats {
            remote: Counters {
                rx: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(s.missed_outbound(), -5);
    }

    #[test]
    fn test_remote_age() {
        let s = fixture();
        assert_eq!(s.remote_age_ms(1_250), Some(250));
        assert_eq!(LinkStats::default().remote_age_ms(10), None);
    }

    #[test]
    fn test_report_line() {
        let line = fixture().to_string();
        assert!(line.starts_with("Local  RX:   48 TX:  100"));
        assert!(line.contains("Missed Local->Remote    3"));
        assert!(line.contains("Remote->Local    2"));
    }
}

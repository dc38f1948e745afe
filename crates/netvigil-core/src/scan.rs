// ── Network range scan ──
//
// Ping every host address in a CIDR block through the bounded queue and
// report which ones answered.

use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::Pinger;
use crate::error::CoreError;
use crate::scheduler::run_bounded;

/// Refuse ranges larger than this (a /20 in IPv4).
pub const MAX_SCAN_HOSTS: usize = 4096;

/// One responsive address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanHit {
    pub address: String,
    pub rtt_ms: Option<f64>,
}

/// Ping sweep over `range` with at most `concurrency` pings in flight.
///
/// Hits are returned in address order.
pub async fn scan_range(
    pinger: Arc<dyn Pinger>,
    range: IpNet,
    concurrency: usize,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<ScanHit>, CoreError> {
    let hosts: Vec<_> = range.hosts().take(MAX_SCAN_HOSTS + 1).collect();
    if hosts.len() > MAX_SCAN_HOSTS {
        return Err(CoreError::ValidationFailed {
            message: format!("{range} has more than {MAX_SCAN_HOSTS} hosts"),
        });
    }
    debug!(%range, hosts = hosts.len(), concurrency, "starting range scan");

    let results = run_bounded(hosts, concurrency, |ip| {
        let pinger = Arc::clone(&pinger);
        async move {
            if cancel.is_cancelled() {
                return None;
            }
            let address = ip.to_string();
            match pinger.ping(&address, timeout, cancel).await {
                Ok(reply) => Some((
                    ip,
                    ScanHit {
                        address,
                        rtt_ms: reply.rtt_ms(),
                    },
                )),
                Err(_) => None,
            }
        }
    })
    .await;

    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    let mut hits: Vec<_> = results.into_iter().flatten().collect();
    hits.sort_by_key(|(ip, _)| *ip);
    Ok(hits.into_iter().map(|(_, hit)| hit).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use netvigil_proto::PingReply;

    /// Answers only for addresses whose last octet is even.
    struct EvenPinger;

    #[async_trait]
    impl Pinger for EvenPinger {
        async fn ping(
            &self,
            address: &str,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<PingReply, netvigil_proto::Error> {
            let last: u8 = address.rsplit('.').next().unwrap().parse().unwrap();
            if last % 2 == 0 {
                Ok(PingReply { rtt: None })
            } else {
                Err(netvigil_proto::Error::Timeout(Duration::from_millis(10)))
            }
        }
    }

    #[tokio::test]
    async fn sweep_reports_responders_in_order() {
        let hits = scan_range(
            Arc::new(EvenPinger),
            "192.0.2.0/29".parse().unwrap(),
            3,
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let addrs: Vec<_> = hits.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(addrs, vec!["192.0.2.2", "192.0.2.4", "192.0.2.6"]);
    }

    #[tokio::test]
    async fn oversized_range_is_rejected() {
        let err = scan_range(
            Arc::new(EvenPinger),
            "10.0.0.0/16".parse().unwrap(),
            3,
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed { .. }));
    }
}

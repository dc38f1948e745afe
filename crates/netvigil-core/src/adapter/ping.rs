// ── Ping-only adapter ──

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Pinger, ProbeAdapter, ProbeOutcome, ProbeRequest};

pub struct PingAdapter {
    pinger: Arc<dyn Pinger>,
}

impl PingAdapter {
    pub fn new(pinger: Arc<dyn Pinger>) -> Self {
        Self { pinger }
    }
}

#[async_trait]
impl ProbeAdapter for PingAdapter {
    async fn probe(&self, request: &ProbeRequest<'_>, cancel: &CancellationToken) -> ProbeOutcome {
        match self
            .pinger
            .ping(request.address, request.timeout, cancel)
            .await
        {
            Ok(reply) => ProbeOutcome::ping(reply),
            Err(e) => ProbeOutcome::from_error(&e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use netvigil_proto::{ErrorKind, PingReply};

    use crate::model::DeviceCredentials;

    struct FixedPinger(Option<Duration>);

    #[async_trait]
    impl Pinger for FixedPinger {
        async fn ping(
            &self,
            address: &str,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<PingReply, netvigil_proto::Error> {
            netvigil_proto::validate_address(address)?;
            match self.0 {
                Some(rtt) => Ok(PingReply { rtt: Some(rtt) }),
                None => Err(netvigil_proto::Error::Timeout(Duration::from_secs(1))),
            }
        }
    }

    fn request<'a>(address: &'a str, creds: &'a DeviceCredentials) -> ProbeRequest<'a> {
        ProbeRequest {
            address,
            credentials: creds,
            detailed: false,
            previous_ports: &[],
            needs_index_resolution: false,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn reply_carries_rtt() {
        let creds = DeviceCredentials::default();
        let adapter = PingAdapter::new(Arc::new(FixedPinger(Some(Duration::from_micros(1500)))));
        let out = adapter
            .probe(&request("192.0.2.1", &creds), &CancellationToken::new())
            .await;
        assert!(out.success && out.ping_only);
        assert_eq!(out.data.unwrap().ping_rtt_ms, Some(1.5));
    }

    #[tokio::test]
    async fn bad_address_is_validation_failure() {
        let creds = DeviceCredentials::default();
        let adapter = PingAdapter::new(Arc::new(FixedPinger(None)));
        let out = adapter
            .probe(&request("10.0.0.1; rm -rf /", &creds), &CancellationToken::new())
            .await;
        assert_eq!(out.failure_kind(), Some(ErrorKind::Validation));
    }
}

// ── ICMP echo via the system `ping` binary ──
//
// The address is parsed as an `IpAddr` before anything is spawned, and the
// child is started from an argument vector, never through a shell. The
// child is killed if the future is dropped.

use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::trace;

use crate::error::Error;

/// Extra time granted to the child beyond its own `-W` wait.
const PROCESS_GRACE: Duration = Duration::from_secs(1);

/// Result of a successful echo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingReply {
    /// Round-trip time, when the output contained one.
    pub rtt: Option<Duration>,
}

impl PingReply {
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt.map(|d| d.as_micros() as f64 / 1000.0)
    }
}

/// Validate an address string for use as a ping target.
pub fn validate_address(address: &str) -> Result<IpAddr, Error> {
    address
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| Error::InvalidAddress(address.to_owned()))
}

/// Send one ICMP echo to `address` and wait up to `timeout` for the reply.
pub async fn ping(address: &str, timeout: Duration) -> Result<PingReply, Error> {
    let ip = validate_address(address)?;
    let (program, args) = command_line(ip, timeout);
    trace!(%ip, program, ?args, "spawning ping");

    let child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout + PROCESS_GRACE, child)
        .await
        .map_err(|_| Error::Timeout(timeout))??;

    if !output.status.success() {
        return Err(Error::Connect {
            address: ip.to_string(),
            reason: "no echo reply".into(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(PingReply {
        rtt: parse_rtt(&stdout),
    })
}

#[cfg(windows)]
fn command_line(ip: IpAddr, timeout: Duration) -> (&'static str, Vec<String>) {
    let mut args = vec!["-n".to_owned(), "1".to_owned()];
    if ip.is_ipv6() {
        args.push("-6".into());
    }
    args.extend(["-w".to_owned(), timeout.as_millis().max(1).to_string()]);
    args.push(ip.to_string());
    ("ping", args)
}

#[cfg(target_os = "macos")]
fn command_line(ip: IpAddr, timeout: Duration) -> (&'static str, Vec<String>) {
    let program = if ip.is_ipv6() { "ping6" } else { "ping" };
    let mut args = vec!["-n".to_owned(), "-c".to_owned(), "1".to_owned()];
    if ip.is_ipv4() {
        args.extend(["-W".to_owned(), timeout.as_millis().max(1).to_string()]);
    }
    args.push(ip.to_string());
    (program, args)
}

#[cfg(not(any(windows, target_os = "macos")))]
fn command_line(ip: IpAddr, timeout: Duration) -> (&'static str, Vec<String>) {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    let mut args = vec!["-n".to_owned(), "-c".to_owned(), "1".to_owned()];
    if ip.is_ipv6() {
        args.push("-6".into());
    }
    args.extend(["-W".to_owned(), secs.max(1).to_string()]);
    args.push(ip.to_string());
    ("ping", args)
}

/// Extract `time=12.3 ms` (or Windows `time<1ms`) from ping output.
pub(crate) fn parse_rtt(output: &str) -> Option<Duration> {
    let idx = output.find("time=").or_else(|| output.find("time<"))?;
    let rest = &output[idx + 5..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let millis: f64 = rest[..end].parse().ok()?;
    if !millis.is_finite() || millis < 0.0 {
        return None;
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::as_conversions
    )]
    let micros = (millis * 1000.0).round() as u64;
    Some(Duration::from_micros(micros))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(matches!(
            validate_address("10.0.0.1; rm -rf /"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(validate_address("$(reboot)").is_err());
        assert!(validate_address("router.local").is_err());
    }

    #[test]
    fn accepts_v4_and_v6() {
        assert!(validate_address("192.168.88.1").is_ok());
        assert!(validate_address("fe80::1").is_ok());
    }

    #[tokio::test]
    async fn invalid_address_never_spawns() {
        let err = ping("not-an-ip", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[test]
    fn parses_linux_rtt() {
        let out = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.412 ms\n";
        let rtt = parse_rtt(out).unwrap();
        assert_eq!(rtt.as_micros(), 412);
    }

    #[test]
    fn parses_windows_sub_millisecond() {
        let out = "Reply from 10.0.0.1: bytes=32 time<1ms TTL=64";
        assert_eq!(parse_rtt(out), Some(Duration::from_millis(1)));
    }

    #[test]
    fn missing_rtt_is_none() {
        assert_eq!(parse_rtt("1 packets transmitted, 1 received"), None);
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    #[test]
    fn linux_command_line_rounds_wait_up() {
        let (program, args) = command_line("10.1.1.1".parse().unwrap(), Duration::from_millis(1500));
        assert_eq!(program, "ping");
        assert_eq!(args, vec!["-n", "-c", "1", "-W", "2", "10.1.1.1"]);
    }
}

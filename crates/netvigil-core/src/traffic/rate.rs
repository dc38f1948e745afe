// ── Counter deltas to bandwidth rates ──

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::LinkStats;

use super::counters::CounterReading;
use super::history::TrafficPoint;

/// 100 Gbps in bytes per second. Anything faster is a bogus sample.
pub const MAX_BYTES_PER_SEC: f64 = 12_500_000_000.0;

/// Samples further apart than this are not comparable.
pub const MAX_SAMPLE_GAP: Duration = Duration::from_secs(300);

/// Rates older than this are zeroed when no fresh sample arrives.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

/// Assumed capacity when a connection's link speed is missing or garbled.
pub const DEFAULT_LINK_BITS: f64 = 1_000_000_000.0;

const COUNTER32_WRAP: u64 = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub in_bytes_per_sec: f64,
    pub out_bytes_per_sec: f64,
    pub utilization_pct: u8,
}

/// Why a sample pair produced no rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Rejection {
    NonPositiveInterval,
    GapTooLong,
    /// Counter went backwards by more than one 32-bit wrap.
    CounterReset,
    /// Faster than 100 Gbps.
    Implausible,
}

/// Octets transferred between two readings of one counter.
///
/// A counter that went backwards is assumed to have wrapped exactly once
/// at 2^32.
pub fn counter_delta(previous: u64, current: u64) -> Option<u64> {
    if current >= previous {
        Some(current - previous)
    } else {
        current
            .checked_add(COUNTER32_WRAP)
            .and_then(|c| c.checked_sub(previous))
    }
}

/// Compute in/out rates from two samples.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
pub fn compute_rates(
    previous: (u64, u64),
    previous_at: DateTime<Utc>,
    current: (u64, u64),
    current_at: DateTime<Utc>,
    link_speed: Option<&str>,
) -> Result<Rates, Rejection> {
    let elapsed_ms = current_at.signed_duration_since(previous_at).num_milliseconds();
    if elapsed_ms <= 0 {
        return Err(Rejection::NonPositiveInterval);
    }
    let elapsed = elapsed_ms as f64 / 1000.0;
    if elapsed > MAX_SAMPLE_GAP.as_secs_f64() {
        return Err(Rejection::GapTooLong);
    }

    let d_in = counter_delta(previous.0, current.0).ok_or(Rejection::CounterReset)?;
    let d_out = counter_delta(previous.1, current.1).ok_or(Rejection::CounterReset)?;
    let in_rate = d_in as f64 / elapsed;
    let out_rate = d_out as f64 / elapsed;
    if in_rate > MAX_BYTES_PER_SEC || out_rate > MAX_BYTES_PER_SEC {
        return Err(Rejection::Implausible);
    }

    Ok(Rates {
        in_bytes_per_sec: in_rate,
        out_bytes_per_sec: out_rate,
        utilization_pct: utilization(in_rate, out_rate, parse_link_speed(link_speed)),
    })
}

/// `min(100, round((in + out) / (2 * capacity) * 100))`, capacity in bytes/s.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
pub fn utilization(in_rate: f64, out_rate: f64, link_bits: f64) -> u8 {
    let capacity = link_bits / 8.0;
    if capacity <= 0.0 {
        return 0;
    }
    let pct = ((in_rate + out_rate) / (2.0 * capacity) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Parse `"1G"`, `"100M"`, `"10K"`, `"2.5Gbps"` into bits per second.
///
/// Falls back to 1 Gbps for anything unparseable.
pub fn parse_link_speed(raw: Option<&str>) -> f64 {
    raw.and_then(|s| {
        let s = s.trim().to_ascii_uppercase();
        let s = s.strip_suffix("BPS").unwrap_or(&s).trim_end();
        let (number, scale) = match s.chars().last()? {
            'G' => (&s[..s.len() - 1], 1e9),
            'M' => (&s[..s.len() - 1], 1e6),
            'K' => (&s[..s.len() - 1], 1e3),
            _ => (s, 1.0),
        };
        let value: f64 = number.trim().parse().ok()?;
        (value > 0.0 && value.is_finite()).then_some(value * scale)
    })
    .unwrap_or(DEFAULT_LINK_BITS)
}

/// Fold a fresh reading into a connection's stats.
///
/// Returns the point to record in history when a rate was produced. A
/// rejected pair leaves the stats untouched, baseline included, until the
/// rates go stale; only then does the new reading become the baseline.
pub fn apply_sample(
    stats: &LinkStats,
    reading: &CounterReading,
    link_speed: Option<&str>,
) -> (LinkStats, Option<TrafficPoint>) {
    let mut next = stats.clone();

    let baseline = match (
        stats.previous_in_octets,
        stats.previous_out_octets,
        stats.previous_sample_at,
    ) {
        (Some(i), Some(o), Some(at)) => Some(((i, o), at)),
        _ => None,
    };
    let Some((previous, previous_at)) = baseline else {
        rebase(&mut next, reading);
        return (next, None);
    };

    match compute_rates(
        previous,
        previous_at,
        (reading.in_octets, reading.out_octets),
        reading.timestamp,
        link_speed,
    ) {
        Ok(rates) => {
            next.in_bytes_per_sec = rates.in_bytes_per_sec;
            next.out_bytes_per_sec = rates.out_bytes_per_sec;
            next.in_bits_per_sec = rates.in_bytes_per_sec * 8.0;
            next.out_bits_per_sec = rates.out_bytes_per_sec * 8.0;
            next.utilization_pct = rates.utilization_pct;
            next.last_sample_at = Some(reading.timestamp);
            next.is_stale = false;
            rebase(&mut next, reading);
            let point = TrafficPoint {
                timestamp: reading.timestamp,
                in_bps: next.in_bits_per_sec,
                out_bps: next.out_bits_per_sec,
                utilization_pct: rates.utilization_pct,
            };
            (next, Some(point))
        }
        Err(rejection) => {
            debug!(%rejection, if_index = reading.if_index, "traffic sample discarded");
            if mark_stale(&mut next, reading.timestamp) {
                rebase(&mut next, reading);
            }
            (next, None)
        }
    }
}

fn rebase(stats: &mut LinkStats, reading: &CounterReading) {
    stats.previous_in_octets = Some(reading.in_octets);
    stats.previous_out_octets = Some(reading.out_octets);
    stats.previous_sample_at = Some(reading.timestamp);
}

/// Zero the rates once the last good sample is older than [`STALE_AFTER`].
///
/// Returns `true` if the stats are (now) stale.
pub fn mark_stale(stats: &mut LinkStats, now: DateTime<Utc>) -> bool {
    let Some(last) = stats.last_sample_at.or(stats.previous_sample_at) else {
        return false;
    };
    let limit = chrono::Duration::from_std(STALE_AFTER).unwrap_or(chrono::TimeDelta::MAX);
    if now.signed_duration_since(last) <= limit {
        return stats.is_stale;
    }
    stats.in_bytes_per_sec = 0.0;
    stats.out_bytes_per_sec = 0.0;
    stats.in_bits_per_sec = 0.0;
    stats.out_bits_per_sec = 0.0;
    stats.utilization_pct = 0;
    stats.is_stale = true;
    true
}

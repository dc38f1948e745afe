// Traffic counter engine: SNMP octet counters in, bandwidth rates out.

pub mod counters;
pub mod history;
pub mod rate;

pub use counters::{CounterReading, CounterSource, IndexHints, SnmpCounterSource};
pub use history::{HISTORY_CAPACITY, TrafficHistory, TrafficPoint};
pub use rate::{
    MAX_BYTES_PER_SEC, Rates, Rejection, STALE_AFTER, apply_sample, compute_rates, counter_delta,
    mark_stale, parse_link_speed, utilization,
};

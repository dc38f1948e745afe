//! Async wire protocols used to probe network devices.
//!
//! - [`routeros`]: the RouterOS API (length-prefixed sentences over TCP),
//!   with tagged pipelining and legacy challenge login.
//! - [`snmp`]: SNMP v1/v2c/v3 over UDP with a hand-rolled BER codec and
//!   the user-based security model.
//! - [`ping`]: a single ICMP echo through the system `ping` binary.
//!
//! Every call here is expected to run under [`guarded`], which bounds it
//! by a deadline and a [`CancellationToken`](tokio_util::sync::CancellationToken).

pub mod credentials;
pub mod deadline;
pub mod error;
pub mod ping;
pub mod routeros;
pub mod snmp;

pub use credentials::{
    AuthProtocol, PrivProtocol, ROUTEROS_API_PORT, RouterCredentials, SNMP_PORT, SnmpCredentials,
    SnmpVersion, UsmCredentials,
};
pub use deadline::guarded;
pub use error::{Error, ErrorKind};
pub use ping::{PingReply, ping, validate_address};
pub use routeros::{Command, RouterOsSession, Row};
pub use snmp::{Oid, SnmpSession, Value, VarBind};

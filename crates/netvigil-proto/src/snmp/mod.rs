// SNMP v1/v2c/v3 client: BER codec, PDUs, USM security, UDP session.

mod ber;
pub mod oid;
pub mod pdu;
pub mod session;
mod usm;
pub mod value;

pub use oid::Oid;
pub use pdu::{
    CommunityMessage, NO_SUCH_NAME, Pdu, PduType, VarBind, decode_community_message,
    encode_community_message,
};
pub use session::{SnmpSession, first_value};
pub use value::Value;

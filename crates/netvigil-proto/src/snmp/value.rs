use std::net::Ipv4Addr;

use super::ber::{self, Reader, TAG_INTEGER, TAG_NULL, TAG_OCTET_STRING, TAG_OID};
use super::oid::Oid;
use crate::error::Error;

const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

/// A variable-binding value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress(Ipv4Addr),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    /// `noSuchObject`, `noSuchInstance` or `endOfMibView`.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Self::NoSuchObject | Self::NoSuchInstance | Self::EndOfMibView
        )
    }

    /// Numeric view of integer-like values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Integer(v) => u64::try_from(*v).ok(),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => Some(u64::from(*v)),
            Self::Counter64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            other => other.as_u64().and_then(|v| i64::try_from(v).ok()),
        }
    }

    /// Lossy text view of an octet string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::OctetString(bytes) => Some(
                String::from_utf8_lossy(bytes)
                    .trim_end_matches('\0')
                    .to_owned(),
            ),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::OctetString(bytes) | Self::Opaque(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Integer(v) => ber::write_integer(TAG_INTEGER, *v, out),
            Self::OctetString(b) => ber::write_tlv(TAG_OCTET_STRING, b, out),
            Self::Null => ber::write_tlv(TAG_NULL, &[], out),
            Self::ObjectId(oid) => ber::write_oid(oid.arcs(), out),
            Self::IpAddress(ip) => ber::write_tlv(TAG_IP_ADDRESS, &ip.octets(), out),
            Self::Counter32(v) => ber::write_unsigned(TAG_COUNTER32, u64::from(*v), out),
            Self::Gauge32(v) => ber::write_unsigned(TAG_GAUGE32, u64::from(*v), out),
            Self::TimeTicks(v) => ber::write_unsigned(TAG_TIMETICKS, u64::from(*v), out),
            Self::Opaque(b) => ber::write_tlv(TAG_OPAQUE, b, out),
            Self::Counter64(v) => ber::write_unsigned(TAG_COUNTER64, *v, out),
            Self::NoSuchObject => ber::write_tlv(TAG_NO_SUCH_OBJECT, &[], out),
            Self::NoSuchInstance => ber::write_tlv(TAG_NO_SUCH_INSTANCE, &[], out),
            Self::EndOfMibView => ber::write_tlv(TAG_END_OF_MIB_VIEW, &[], out),
        }
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let tlv = reader.read_tlv()?;
        let c = tlv.content;
        let value = match tlv.tag {
            TAG_INTEGER => Self::Integer(ber::decode_signed(c)?),
            TAG_OCTET_STRING => Self::OctetString(c.to_vec()),
            TAG_NULL => Self::Null,
            TAG_OID => Self::ObjectId(Oid::from_arcs(&ber::decode_oid(c)?)),
            TAG_IP_ADDRESS => {
                let octets: [u8; 4] = c
                    .try_into()
                    .map_err(|_| Error::protocol("IpAddress must be 4 bytes"))?;
                Self::IpAddress(Ipv4Addr::from(octets))
            }
            TAG_COUNTER32 => Self::Counter32(narrow(ber::decode_unsigned(c)?)),
            TAG_GAUGE32 => Self::Gauge32(narrow(ber::decode_unsigned(c)?)),
            TAG_TIMETICKS => Self::TimeTicks(narrow(ber::decode_unsigned(c)?)),
            TAG_OPAQUE => Self::Opaque(c.to_vec()),
            TAG_COUNTER64 => Self::Counter64(ber::decode_unsigned(c)?),
            TAG_NO_SUCH_OBJECT => Self::NoSuchObject,
            TAG_NO_SUCH_INSTANCE => Self::NoSuchInstance,
            TAG_END_OF_MIB_VIEW => Self::EndOfMibView,
            other => {
                return Err(Error::protocol(format!(
                    "unsupported value tag 0x{other:02x}"
                )));
            }
        };
        Ok(value)
    }
}

/// Some agents send 32-bit application types with a fifth sign byte.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn narrow(v: u64) -> u32 {
    v as u32
}

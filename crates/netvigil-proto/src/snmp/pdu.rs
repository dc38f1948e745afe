// ── PDUs and community messages ──

use super::ber::{self, Reader, TAG_INTEGER, TAG_OCTET_STRING, TAG_SEQUENCE};
use super::oid::Oid;
use super::value::Value;
use crate::credentials::SnmpVersion;
use crate::error::Error;

/// SNMP error-status `noSuchName` (v1 end-of-walk signal).
pub const NO_SUCH_NAME: i64 = 2;

/// PDU type, identified by its context-specific constructed tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduType {
    Get,
    GetNext,
    Response,
    GetBulk,
    Report,
}

impl PduType {
    fn tag(self) -> u8 {
        match self {
            Self::Get => 0xA0,
            Self::GetNext => 0xA1,
            Self::Response => 0xA2,
            Self::GetBulk => 0xA5,
            Self::Report => 0xA8,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, Error> {
        Ok(match tag {
            0xA0 => Self::Get,
            0xA1 => Self::GetNext,
            0xA2 => Self::Response,
            0xA5 => Self::GetBulk,
            0xA8 => Self::Report,
            other => {
                return Err(Error::protocol(format!(
                    "unsupported PDU type 0x{other:02x}"
                )));
            }
        })
    }
}

/// One `name = value` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }

    /// A request binding (value `NULL`).
    pub fn request(oid: Oid) -> Self {
        Self::new(oid, Value::Null)
    }
}

/// A protocol data unit.
///
/// For `GetBulk`, `error_status` carries non-repeaters and `error_index`
/// carries max-repetitions, as on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub kind: PduType,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    pub fn new(kind: PduType, request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            kind,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }

    pub fn get_bulk(
        request_id: i32,
        non_repeaters: i64,
        max_repetitions: i64,
        varbinds: Vec<VarBind>,
    ) -> Self {
        Self {
            kind: PduType::GetBulk,
            request_id,
            error_status: non_repeaters,
            error_index: max_repetitions,
            varbinds,
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        ber::write_constructed(self.kind.tag(), out, |pdu| {
            ber::write_integer(TAG_INTEGER, i64::from(self.request_id), pdu);
            ber::write_integer(TAG_INTEGER, self.error_status, pdu);
            ber::write_integer(TAG_INTEGER, self.error_index, pdu);
            ber::write_constructed(TAG_SEQUENCE, pdu, |list| {
                for vb in &self.varbinds {
                    ber::write_constructed(TAG_SEQUENCE, list, |item| {
                        ber::write_oid(vb.oid.arcs(), item);
                        vb.value.encode(item);
                    });
                }
            });
        });
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let tlv = reader.read_tlv()?;
        let kind = PduType::from_tag(tlv.tag)?;
        let mut body = Reader::at(tlv);
        let request_id = i32::try_from(body.read_integer()?)
            .map_err(|_| Error::protocol("request-id out of range"))?;
        let error_status = body.read_integer()?;
        let error_index = body.read_integer()?;
        let mut list = body.nested(TAG_SEQUENCE)?;
        let mut varbinds = Vec::new();
        while !list.is_empty() {
            let mut item = list.nested(TAG_SEQUENCE)?;
            let oid_tlv = item.expect(ber::TAG_OID)?;
            let oid = Oid::from_arcs(&ber::decode_oid(oid_tlv.content)?);
            let value = Value::decode(&mut item)?;
            varbinds.push(VarBind { oid, value });
        }
        Ok(Self {
            kind,
            request_id,
            error_status,
            error_index,
            varbinds,
        })
    }
}

/// A decoded v1/v2c message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityMessage {
    pub version: SnmpVersion,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

/// Encode a v1/v2c message.
pub fn encode_community_message(version: SnmpVersion, community: &[u8], pdu: &Pdu) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + pdu.varbinds.len() * 24);
    ber::write_constructed(TAG_SEQUENCE, &mut out, |msg| {
        ber::write_integer(TAG_INTEGER, version.wire(), msg);
        ber::write_tlv(TAG_OCTET_STRING, community, msg);
        pdu.encode(msg);
    });
    out
}

/// Decode a v1/v2c message.
pub fn decode_community_message(bytes: &[u8]) -> Result<CommunityMessage, Error> {
    let mut outer = Reader::new(bytes);
    let mut msg = outer.nested(TAG_SEQUENCE)?;
    let version = match msg.read_integer()? {
        0 => SnmpVersion::V1,
        1 => SnmpVersion::V2c,
        other => {
            return Err(Error::protocol(format!(
                "unexpected message version {other}"
            )));
        }
    };
    let community = msg.read_octets()?.to_vec();
    let pdu = Pdu::decode(&mut msg)?;
    Ok(CommunityMessage {
        version,
        community,
        pdu,
    })
}

/// Peek the version field without decoding the rest.
pub(crate) fn message_version(bytes: &[u8]) -> Result<i64, Error> {
    let mut outer = Reader::new(bytes);
    let mut msg = outer.nested(TAG_SEQUENCE)?;
    msg.read_integer()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn get_request_matches_reference_bytes() {
        let pdu = Pdu::new(
            PduType::Get,
            1,
            vec![VarBind::request(Oid::from_arcs(&[1, 3, 6, 1, 2, 1, 1, 1, 0]))],
        );
        let bytes = encode_community_message(SnmpVersion::V2c, b"public", &pdu);
        let expected: Vec<u8> = vec![
            0x30, 0x26, // message
            0x02, 0x01, 0x01, // version 2c
            0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', // community
            0xA0, 0x19, // GetRequest
            0x02, 0x01, 0x01, // request-id
            0x02, 0x01, 0x00, // error-status
            0x02, 0x01, 0x00, // error-index
            0x30, 0x0E, // varbind list
            0x30, 0x0C, // varbind
            0x06, 0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, // oid
            0x05, 0x00, // NULL
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn response_with_mixed_values_decodes() {
        let pdu = Pdu {
            kind: PduType::Response,
            request_id: 77,
            error_status: 0,
            error_index: 0,
            varbinds: vec![
                VarBind::new(
                    Oid::from_arcs(&[1, 3, 6, 1, 2, 1, 1, 5, 0]),
                    Value::OctetString(b"core-sw".to_vec()),
                ),
                VarBind::new(
                    Oid::from_arcs(&[1, 3, 6, 1, 2, 1, 1, 3, 0]),
                    Value::TimeTicks(123_456),
                ),
            ],
        };
        let bytes = encode_community_message(SnmpVersion::V1, b"ro", &pdu);
        let msg = decode_community_message(&bytes).unwrap();
        assert_eq!(msg.version, SnmpVersion::V1);
        assert_eq!(msg.community, b"ro");
        assert_eq!(msg.pdu, pdu);
    }

    #[test]
    fn bulk_fields_ride_in_error_slots() {
        let pdu = Pdu::get_bulk(5, 0, 1, vec![]);
        assert_eq!(pdu.error_status, 0);
        assert_eq!(pdu.error_index, 1);
        assert_eq!(pdu.kind, PduType::GetBulk);
    }

    #[test]
    fn unknown_pdu_tag_rejected() {
        let mut bytes = encode_community_message(
            SnmpVersion::V2c,
            b"public",
            &Pdu::new(PduType::Get, 1, vec![]),
        );
        let tag_pos = bytes.iter().position(|b| *b == 0xA0).unwrap();
        bytes[tag_pos] = 0xA7;
        assert!(decode_community_message(&bytes).is_err());
    }
}

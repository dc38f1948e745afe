// ── BER primitives ──
//
// Just enough ASN.1 BER for SNMP: definite lengths, primitive integers,
// octet strings, OIDs, and constructed sequences. The reader tracks
// absolute offsets so USM can locate the authentication parameters
// inside the original datagram.

use crate::error::Error;

pub(crate) const TAG_INTEGER: u8 = 0x02;
pub(crate) const TAG_OCTET_STRING: u8 = 0x04;
pub(crate) const TAG_NULL: u8 = 0x05;
pub(crate) const TAG_OID: u8 = 0x06;
pub(crate) const TAG_SEQUENCE: u8 = 0x30;

// ── Writer ───────────────────────────────────────────────────────────

/// Append a tag and definite length. Returns the number of bytes written.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub(crate) fn write_header(tag: u8, len: usize, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    out.push(tag);
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let significant = &bytes[skip..];
        out.push(0x80 | significant.len() as u8);
        out.extend_from_slice(significant);
    }
    out.len() - start
}

pub(crate) fn write_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    write_header(tag, content.len(), out);
    out.extend_from_slice(content);
}

/// Signed integer, minimal two's complement.
pub(crate) fn write_integer(tag: u8, value: i64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        let redundant = (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    write_tlv(tag, &bytes[start..], out);
}

/// Unsigned integer (Counter32, Gauge32, TimeTicks, Counter64).
pub(crate) fn write_unsigned(tag: u8, value: u64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    let mut content = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    write_tlv(tag, &content, out);
}

/// Build a constructed value by writing its children into a scratch buffer.
pub(crate) fn write_constructed(tag: u8, out: &mut Vec<u8>, body: impl FnOnce(&mut Vec<u8>)) {
    let mut content = Vec::new();
    body(&mut content);
    write_tlv(tag, &content, out);
}

pub(crate) fn write_oid(arcs: &[u32], out: &mut Vec<u8>) {
    let mut content = Vec::with_capacity(arcs.len() + 2);
    let (first, rest) = match arcs {
        [a, b, rest @ ..] => (a * 40 + b, rest),
        [a] => (a * 40, &[][..]),
        [] => (0, &[][..]),
    };
    push_base128(first, &mut content);
    for &arc in rest {
        push_base128(arc, &mut content);
    }
    write_tlv(TAG_OID, &content, out);
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn push_base128(mut value: u32, out: &mut Vec<u8>) {
    let mut tmp = [0u8; 5];
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = tmp.len() - 1;
    for (j, b) in tmp.iter().enumerate().skip(i) {
        out.push(if j == last { *b } else { *b | 0x80 });
    }
}

// ── Reader ───────────────────────────────────────────────────────────

/// One decoded TLV: tag, content slice, and the content's absolute offset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tlv<'a> {
    pub tag: u8,
    pub content: &'a [u8],
    pub offset: usize,
}

/// Cursor over a BER buffer.
#[derive(Debug, Clone)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            base: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn read_tlv(&mut self) -> Result<Tlv<'a>, Error> {
        let tag = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::protocol("truncated BER: missing tag"))?;
        let len_byte = *self
            .buf
            .get(self.pos + 1)
            .ok_or_else(|| Error::protocol("truncated BER: missing length"))?;
        let mut cursor = self.pos + 2;
        let len = if len_byte & 0x80 == 0 {
            usize::from(len_byte)
        } else {
            let count = usize::from(len_byte & 0x7F);
            if count == 0 || count > 4 {
                return Err(Error::protocol("unsupported BER length form"));
            }
            let bytes = self
                .buf
                .get(cursor..cursor + count)
                .ok_or_else(|| Error::protocol("truncated BER length"))?;
            cursor += count;
            bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
        };
        let content = self
            .buf
            .get(cursor..cursor + len)
            .ok_or_else(|| Error::protocol("truncated BER content"))?;
        let offset = self.base + cursor;
        self.pos = cursor + len;
        Ok(Tlv {
            tag,
            content,
            offset,
        })
    }

    pub(crate) fn expect(&mut self, tag: u8) -> Result<Tlv<'a>, Error> {
        let tlv = self.read_tlv()?;
        if tlv.tag != tag {
            return Err(Error::protocol(format!(
                "expected tag 0x{tag:02x}, found 0x{:02x}",
                tlv.tag
            )));
        }
        Ok(tlv)
    }

    /// Enter a constructed value with the given tag.
    pub(crate) fn nested(&mut self, tag: u8) -> Result<Reader<'a>, Error> {
        let tlv = self.expect(tag)?;
        Ok(Reader::at(tlv))
    }

    /// Reader over the content of an already-read TLV.
    pub(crate) fn at(tlv: Tlv<'a>) -> Reader<'a> {
        Reader {
            buf: tlv.content,
            pos: 0,
            base: tlv.offset,
        }
    }

    pub(crate) fn read_integer(&mut self) -> Result<i64, Error> {
        let tlv = self.expect(TAG_INTEGER)?;
        decode_signed(tlv.content)
    }

    pub(crate) fn read_octets(&mut self) -> Result<&'a [u8], Error> {
        Ok(self.expect(TAG_OCTET_STRING)?.content)
    }
}

pub(crate) fn decode_signed(content: &[u8]) -> Result<i64, Error> {
    if content.is_empty() || content.len() > 8 {
        return Err(Error::protocol("invalid INTEGER length"));
    }
    let negative = content[0] & 0x80 != 0;
    let mut value: i64 = if negative { -1 } else { 0 };
    for &b in content {
        value = (value << 8) | i64::from(b);
    }
    Ok(value)
}

pub(crate) fn decode_unsigned(content: &[u8]) -> Result<u64, Error> {
    let trimmed = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if trimmed.is_empty() || trimmed.len() > 8 {
        return Err(Error::protocol("invalid unsigned length"));
    }
    Ok(trimmed.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

pub(crate) fn decode_oid(content: &[u8]) -> Result<Vec<u32>, Error> {
    let mut arcs = Vec::with_capacity(content.len() + 1);
    let mut value: u32 = 0;
    let mut first = true;
    for (i, &b) in content.iter().enumerate() {
        if value > (u32::MAX >> 7) {
            return Err(Error::protocol("OID arc overflow"));
        }
        value = (value << 7) | u32::from(b & 0x7F);
        if b & 0x80 == 0 {
            if first {
                let (a, rest) = match value {
                    v if v < 40 => (0, v),
                    v if v < 80 => (1, v - 40),
                    v => (2, v - 80),
                };
                arcs.push(a);
                arcs.push(rest);
                first = false;
            } else {
                arcs.push(value);
            }
            value = 0;
        } else if i == content.len() - 1 {
            return Err(Error::protocol("truncated OID arc"));
        }
    }
    Ok(arcs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn integer_encoding_is_minimal() {
        let mut out = Vec::new();
        write_integer(TAG_INTEGER, 127, &mut out);
        assert_eq!(out, vec![0x02, 0x01, 0x7F]);

        out.clear();
        write_integer(TAG_INTEGER, 128, &mut out);
        assert_eq!(out, vec![0x02, 0x02, 0x00, 0x80]);

        out.clear();
        write_integer(TAG_INTEGER, -1, &mut out);
        assert_eq!(out, vec![0x02, 0x01, 0xFF]);
    }

    #[test]
    fn negative_integer_decodes() {
        assert_eq!(decode_signed(&[0xFF, 0x7F]).unwrap(), -129);
        assert_eq!(decode_signed(&[0x00, 0x80]).unwrap(), 128);
    }

    #[test]
    fn unsigned_high_bit_gets_leading_zero() {
        let mut out = Vec::new();
        write_unsigned(0x41, u64::from(u32::MAX), &mut out);
        assert_eq!(out, vec![0x41, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode_unsigned(&out[2..]).unwrap(), u64::from(u32::MAX));
    }

    #[test]
    fn oid_encoding_matches_known_bytes() {
        let mut out = Vec::new();
        write_oid(&[1, 3, 6, 1, 2, 1, 1, 1, 0], &mut out);
        assert_eq!(out, vec![0x06, 0x08, 0x2B, 6, 1, 2, 1, 1, 1, 0]);
    }

    #[test]
    fn oid_multi_byte_arc() {
        let mut out = Vec::new();
        write_oid(&[1, 3, 6, 1, 4, 1, 14988], &mut out);
        assert_eq!(decode_oid(&out[2..]).unwrap(), vec![1, 3, 6, 1, 4, 1, 14988]);
    }

    #[test]
    fn long_form_length() {
        let mut out = Vec::new();
        let payload = vec![0xAA; 300];
        write_tlv(TAG_OCTET_STRING, &payload, &mut out);
        assert_eq!(&out[..4], &[0x04, 0x82, 0x01, 0x2C]);
        let mut reader = Reader::new(&out);
        let tlv = reader.read_tlv().unwrap();
        assert_eq!(tlv.content.len(), 300);
        assert_eq!(tlv.offset, 4);
        assert!(reader.is_empty());
    }

    #[test]
    fn nested_reader_reports_absolute_offsets() {
        let mut out = Vec::new();
        write_constructed(TAG_SEQUENCE, &mut out, |seq| {
            write_integer(TAG_INTEGER, 3, seq);
            write_tlv(TAG_OCTET_STRING, b"abc", seq);
        });
        let mut outer = Reader::new(&out);
        let mut inner = outer.nested(TAG_SEQUENCE).unwrap();
        assert_eq!(inner.read_integer().unwrap(), 3);
        let tlv = inner.expect(TAG_OCTET_STRING).unwrap();
        assert_eq!(&out[tlv.offset..tlv.offset + 3], b"abc");
    }

    #[test]
    fn truncated_input_is_protocol_error() {
        let mut reader = Reader::new(&[0x04, 0x05, 0x01]);
        assert!(reader.read_tlv().is_err());
    }
}

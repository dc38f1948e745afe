// ── RouterOS API framing ──
//
// The API speaks "sentences": a sequence of length-prefixed "words"
// terminated by a zero-length word. Lengths use a variable-width prefix
// of one to five bytes.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

/// Upper bound on a single buffered sentence. Interface tables on large
/// routers stay far below this.
const MAX_SENTENCE_BYTES: usize = 16 * 1024 * 1024;

/// One API sentence: a command or a reply, as a list of words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence(pub Vec<String>);

impl Sentence {
    pub fn words(&self) -> &[String] {
        &self.0
    }
}

// ── Length prefix ────────────────────────────────────────────────────

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub(crate) fn encode_length(len: usize, dst: &mut BytesMut) {
    if len < 0x80 {
        dst.put_u8(len as u8);
    } else if len < 0x4000 {
        dst.put_u16((len as u16) | 0x8000);
    } else if len < 0x20_0000 {
        let v = (len as u32) | 0x00C0_0000;
        dst.put_u8((v >> 16) as u8);
        dst.put_u16(v as u16);
    } else if len < 0x1000_0000 {
        dst.put_u32((len as u32) | 0xE000_0000);
    } else {
        dst.put_u8(0xF0);
        dst.put_u32(len as u32);
    }
}

/// Decode a length prefix at the start of `src`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the decoded
/// length and the number of prefix bytes consumed.
pub(crate) fn decode_length(src: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };
    let (width, mask) = match first {
        b if b & 0x80 == 0x00 => (1, 0x7F),
        b if b & 0xC0 == 0x80 => (2, 0x3F),
        b if b & 0xE0 == 0xC0 => (3, 0x1F),
        b if b & 0xF0 == 0xE0 => (4, 0x0F),
        0xF0 => (5, 0x00),
        other => {
            return Err(Error::protocol(format!(
                "unsupported control byte 0x{other:02x} in word length"
            )));
        }
    };
    if src.len() < width {
        return Ok(None);
    }
    let mut len = usize::from(first & mask);
    for &b in &src[1..width] {
        len = (len << 8) | usize::from(b);
    }
    Ok(Some((len, width)))
}

// ── Codec ────────────────────────────────────────────────────────────

/// `tokio_util` codec turning a byte stream into [`Sentence`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct SentenceCodec;

impl Decoder for SentenceCodec {
    type Item = Sentence;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Sentence>, Error> {
        // First pass: find the end of a complete sentence without consuming.
        let mut offset = 0;
        let mut spans = Vec::new();
        loop {
            let Some((len, width)) = decode_length(&src[offset..])? else {
                return Ok(None);
            };
            offset += width;
            if len == 0 {
                break;
            }
            if offset + len > MAX_SENTENCE_BYTES {
                return Err(Error::protocol("sentence exceeds maximum size"));
            }
            if src.len() < offset + len {
                src.reserve(offset + len - src.len());
                return Ok(None);
            }
            spans.push((offset, len));
            offset += len;
        }

        let words = spans
            .into_iter()
            .map(|(start, len)| String::from_utf8_lossy(&src[start..start + len]).into_owned())
            .collect();
        src.advance(offset);
        Ok(Some(Sentence(words)))
    }
}

impl Encoder<Sentence> for SentenceCodec {
    type Error = Error;

    fn encode(&mut self, item: Sentence, dst: &mut BytesMut) -> Result<(), Error> {
        for word in &item.0 {
            encode_length(word.len(), dst);
            dst.put_slice(word.as_bytes());
        }
        dst.put_u8(0);
        Ok(())
    }
}

// ── Commands ─────────────────────────────────────────────────────────

/// Builder for an API command sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    path: String,
    words: Vec<String>,
}

impl Command {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            words: Vec::new(),
        }
    }

    /// Add an `=key=value` attribute word.
    pub fn attr(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.words.push(format!("={key}={}", value.as_ref()));
        self
    }

    /// Add a `?query` word (e.g. `?type=ether`).
    pub fn query(mut self, query: impl AsRef<str>) -> Self {
        self.words.push(format!("?{}", query.as_ref()));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn into_sentence(self, tag: Option<u32>) -> Sentence {
        let mut words = Vec::with_capacity(self.words.len() + 2);
        words.push(self.path);
        words.extend(self.words);
        if let Some(tag) = tag {
            words.push(format!(".tag={tag}"));
        }
        Sentence(words)
    }
}

// ── Replies ──────────────────────────────────────────────────────────

/// One attribute row from a `!re` reply.
pub type Row = BTreeMap<String, String>;

/// Reply category, from the first word of a reply sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Re,
    Done,
    Trap,
    Fatal,
    Empty,
}

/// A parsed reply sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub tag: Option<String>,
    pub attributes: Row,
    /// Free-text payload of a `!fatal` reply.
    pub reason: Option<String>,
}

impl Reply {
    /// The `message` attribute of a `!trap`, or the `!fatal` reason.
    pub fn message(&self) -> String {
        self.attributes
            .get("message")
            .cloned()
            .or_else(|| self.reason.clone())
            .unwrap_or_else(|| "unspecified error".into())
    }
}

impl TryFrom<Sentence> for Reply {
    type Error = Error;

    fn try_from(sentence: Sentence) -> Result<Self, Error> {
        let mut words = sentence.0.into_iter();
        let head = words
            .next()
            .ok_or_else(|| Error::protocol("empty reply sentence"))?;
        let kind = match head.as_str() {
            "!re" => ReplyKind::Re,
            "!done" => ReplyKind::Done,
            "!trap" => ReplyKind::Trap,
            "!fatal" => ReplyKind::Fatal,
            "!empty" => ReplyKind::Empty,
            other => return Err(Error::protocol(format!("unknown reply type {other:?}"))),
        };

        let mut reply = Reply {
            kind,
            tag: None,
            attributes: Row::new(),
            reason: None,
        };
        for word in words {
            if let Some(tag) = word.strip_prefix(".tag=") {
                reply.tag = Some(tag.to_owned());
            } else if let Some(rest) = word.strip_prefix('=') {
                // The value may itself contain '=' characters.
                match rest.split_once('=') {
                    Some((k, v)) => reply.attributes.insert(k.to_owned(), v.to_owned()),
                    None => reply.attributes.insert(rest.to_owned(), String::new()),
                };
            } else if kind == ReplyKind::Fatal {
                reply.reason = Some(word);
            }
        }
        Ok(reply)
    }
}

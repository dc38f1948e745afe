// ── SNMPv3 user-based security model ──
//
// Message framing for v3, key localization, HMAC authentication, and
// DES/AES privacy. Authentication parameters are zero-filled while the
// digest is computed over the whole serialized message, then patched in.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{AsyncStreamCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::Des;
use hmac::digest::core_api::BlockSizeUser;
use hmac::digest::Digest;
use hmac::{Mac, SimpleHmac};
use md5::Md5;
use secrecy::ExposeSecret;
use sha1::Sha1;
use sha2::Sha256;

use super::ber::{self, Reader, TAG_INTEGER, TAG_OCTET_STRING, TAG_SEQUENCE};
use super::pdu::{Pdu, PduType};
use crate::credentials::{AuthProtocol, PrivProtocol, UsmCredentials};
use crate::error::Error;

pub(crate) const FLAG_AUTH: u8 = 0x01;
pub(crate) const FLAG_PRIV: u8 = 0x02;
pub(crate) const FLAG_REPORTABLE: u8 = 0x04;

const SNMP_V3: i64 = 3;
const USM_SECURITY_MODEL: i64 = 3;
const MAX_MESSAGE_SIZE: i64 = 65_507;
const KEY_EXPANSION_BYTES: usize = 1_048_576;

/// `usmStats` subtree; the arc after it names the report reason.
const USM_STATS: [u32; 9] = [1, 3, 6, 1, 6, 3, 15, 1, 1];

// ── Reports ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReportKind {
    UnsupportedSecLevel,
    NotInTimeWindow,
    UnknownUserName,
    UnknownEngineId,
    WrongDigest,
    DecryptionError,
    Other,
}

impl ReportKind {
    pub(crate) fn classify(pdu: &Pdu) -> Self {
        let Some(vb) = pdu.varbinds.first() else {
            return Self::Other;
        };
        match vb.oid.arcs().strip_prefix(USM_STATS.as_slice()) {
            Some([1, ..]) => Self::UnsupportedSecLevel,
            Some([2, ..]) => Self::NotInTimeWindow,
            Some([3, ..]) => Self::UnknownUserName,
            Some([4, ..]) => Self::UnknownEngineId,
            Some([5, ..]) => Self::WrongDigest,
            Some([6, ..]) => Self::DecryptionError,
            _ => Self::Other,
        }
    }

    pub(crate) fn describe(self) -> &'static str {
        match self {
            Self::UnsupportedSecLevel => "unsupported security level",
            Self::NotInTimeWindow => "not in time window",
            Self::UnknownUserName => "unknown user name",
            Self::UnknownEngineId => "unknown engine id",
            Self::WrongDigest => "wrong digest",
            Self::DecryptionError => "decryption error",
            Self::Other => "unrecognised report",
        }
    }
}

// ── Message parts ────────────────────────────────────────────────────

/// The USM security parameters carried in every v3 message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SecurityParams {
    pub engine_id: Vec<u8>,
    pub boots: u32,
    pub time: u32,
    pub username: Vec<u8>,
    pub auth_params: Vec<u8>,
    pub priv_params: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScopedPdu {
    pub context_engine_id: Vec<u8>,
    pub context_name: Vec<u8>,
    pub pdu: Pdu,
}

impl ScopedPdu {
    fn encode(&self, out: &mut Vec<u8>) {
        ber::write_constructed(TAG_SEQUENCE, out, |seq| {
            ber::write_tlv(TAG_OCTET_STRING, &self.context_engine_id, seq);
            ber::write_tlv(TAG_OCTET_STRING, &self.context_name, seq);
            self.pdu.encode(seq);
        });
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let mut seq = reader.nested(TAG_SEQUENCE)?;
        let context_engine_id = seq.read_octets()?.to_vec();
        let context_name = seq.read_octets()?.to_vec();
        let pdu = Pdu::decode(&mut seq)?;
        Ok(Self {
            context_engine_id,
            context_name,
            pdu,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DecodedMessage {
    pub msg_id: i32,
    pub flags: u8,
    pub params: SecurityParams,
    pub scoped: ScopedPdu,
}

impl DecodedMessage {
    pub(crate) fn is_report(&self) -> bool {
        self.scoped.pdu.kind == PduType::Report
    }
}

// ── Keys ─────────────────────────────────────────────────────────────

/// Keys localized to one authoritative engine.
#[derive(Clone)]
pub(crate) struct LocalizedKeys {
    auth: Option<(AuthProtocol, Vec<u8>)>,
    privacy: Option<(PrivProtocol, Vec<u8>)>,
}

impl std::fmt::Debug for LocalizedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalizedKeys")
            .field("auth", &self.auth.as_ref().map(|(p, _)| p))
            .field("privacy", &self.privacy.as_ref().map(|(p, _)| p))
            .finish()
    }
}

impl LocalizedKeys {
    pub(crate) fn derive(usm: &UsmCredentials, engine_id: &[u8]) -> Result<Self, Error> {
        let auth = match &usm.auth {
            Some((proto, password)) => {
                let key = localized_key(*proto, password.expose_secret().as_bytes(), engine_id)?;
                Some((*proto, key))
            }
            None => None,
        };
        let privacy = match (&usm.privacy, &auth) {
            (Some(_), None) => {
                return Err(Error::InvalidCredentials(
                    "SNMPv3 privacy requires an authentication protocol".into(),
                ));
            }
            (Some((proto, password)), Some((auth_proto, _))) => {
                let key =
                    localized_key(*auth_proto, password.expose_secret().as_bytes(), engine_id)?;
                if key.len() < 16 {
                    return Err(Error::InvalidCredentials("privacy key too short".into()));
                }
                Some((*proto, key))
            }
            (None, _) => None,
        };
        Ok(Self { auth, privacy })
    }

    pub(crate) fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.auth.is_some() {
            flags |= FLAG_AUTH;
        }
        if self.privacy.is_some() {
            flags |= FLAG_PRIV;
        }
        flags
    }
}

fn localized_key(proto: AuthProtocol, password: &[u8], engine_id: &[u8]) -> Result<Vec<u8>, Error> {
    if password.is_empty() {
        return Err(Error::InvalidCredentials("empty SNMPv3 passphrase".into()));
    }
    Ok(match proto {
        AuthProtocol::Md5 => localize::<Md5>(&password_to_key::<Md5>(password), engine_id),
        AuthProtocol::Sha => localize::<Sha1>(&password_to_key::<Sha1>(password), engine_id),
        AuthProtocol::Sha256 => {
            localize::<Sha256>(&password_to_key::<Sha256>(password), engine_id)
        }
    })
}

/// Hash one megabyte of the repeated passphrase.
fn password_to_key<D: Digest>(password: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    let mut chunk = [0u8; 64];
    let mut idx = 0;
    for _ in 0..KEY_EXPANSION_BYTES / chunk.len() {
        for b in &mut chunk {
            *b = password[idx % password.len()];
            idx += 1;
        }
        hasher.update(chunk);
    }
    hasher.finalize().to_vec()
}

/// `H(Ku || engineID || Ku)`
fn localize<D: Digest>(ku: &[u8], engine_id: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(ku);
    hasher.update(engine_id);
    hasher.update(ku);
    hasher.finalize().to_vec()
}

// ── Authentication ───────────────────────────────────────────────────

fn auth_len(proto: AuthProtocol) -> usize {
    match proto {
        AuthProtocol::Md5 | AuthProtocol::Sha => 12,
        AuthProtocol::Sha256 => 24,
    }
}

fn hmac_tag<D: Digest + BlockSizeUser>(key: &[u8], data: &[u8], len: usize) -> Result<Vec<u8>, Error> {
    let mut mac = SimpleHmac::<D>::new_from_slice(key)
        .map_err(|_| Error::InvalidCredentials("invalid authentication key".into()))?;
    mac.update(data);
    let mut tag = mac.finalize().into_bytes().to_vec();
    tag.truncate(len);
    Ok(tag)
}

fn hmac_verify<D: Digest + BlockSizeUser>(key: &[u8], data: &[u8], tag: &[u8]) -> Result<bool, Error> {
    let mut mac = SimpleHmac::<D>::new_from_slice(key)
        .map_err(|_| Error::InvalidCredentials("invalid authentication key".into()))?;
    mac.update(data);
    Ok(mac.verify_truncated_left(tag).is_ok())
}

fn sign(proto: AuthProtocol, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let len = auth_len(proto);
    match proto {
        AuthProtocol::Md5 => hmac_tag::<Md5>(key, data, len),
        AuthProtocol::Sha => hmac_tag::<Sha1>(key, data, len),
        AuthProtocol::Sha256 => hmac_tag::<Sha256>(key, data, len),
    }
}

fn verify(proto: AuthProtocol, key: &[u8], data: &[u8], tag: &[u8]) -> Result<bool, Error> {
    if tag.len() != auth_len(proto) {
        return Ok(false);
    }
    match proto {
        AuthProtocol::Md5 => hmac_verify::<Md5>(key, data, tag),
        AuthProtocol::Sha => hmac_verify::<Sha1>(key, data, tag),
        AuthProtocol::Sha256 => hmac_verify::<Sha256>(key, data, tag),
    }
}

// ── Privacy ──────────────────────────────────────────────────────────

fn invalid_key<E>(_: E) -> Error {
    Error::InvalidCredentials("invalid privacy key".into())
}

/// Returns `(ciphertext, privParameters)`.
fn encrypt(
    proto: PrivProtocol,
    key: &[u8],
    boots: u32,
    time: u32,
    salt: u64,
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    match proto {
        PrivProtocol::Des => {
            #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
            let counter = salt as u32;
            let mut salt_bytes = Vec::with_capacity(8);
            salt_bytes.extend_from_slice(&boots.to_be_bytes());
            salt_bytes.extend_from_slice(&counter.to_be_bytes());
            let iv = des_iv(key, &salt_bytes)?;

            let mut buf = plaintext.to_vec();
            let padded = buf.len().div_ceil(8) * 8;
            buf.resize(padded, 0);
            let cipher = cbc::Encryptor::<Des>::new_from_slices(&key[..8], &iv).map_err(invalid_key)?;
            cipher
                .encrypt_padded_mut::<NoPadding>(&mut buf, padded)
                .map_err(|_| Error::protocol("DES padding failure"))?;
            Ok((buf, salt_bytes))
        }
        PrivProtocol::Aes => {
            let salt_bytes = salt.to_be_bytes().to_vec();
            let iv = aes_iv(boots, time, &salt_bytes)?;
            let mut buf = plaintext.to_vec();
            cfb_mode::Encryptor::<Aes128>::new_from_slices(&key[..16], &iv)
                .map_err(invalid_key)?
                .encrypt(&mut buf);
            Ok((buf, salt_bytes))
        }
    }
}

fn decrypt(
    proto: PrivProtocol,
    key: &[u8],
    params: &SecurityParams,
    ciphertext: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut buf = ciphertext.to_vec();
    match proto {
        PrivProtocol::Des => {
            if buf.len() % 8 != 0 {
                return Err(Error::protocol("DES ciphertext is not block aligned"));
            }
            let iv = des_iv(key, &params.priv_params)?;
            let cipher = cbc::Decryptor::<Des>::new_from_slices(&key[..8], &iv).map_err(invalid_key)?;
            let len = cipher
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(|_| Error::protocol("DES decryption failure"))?
                .len();
            buf.truncate(len);
        }
        PrivProtocol::Aes => {
            let iv = aes_iv(params.boots, params.time, &params.priv_params)?;
            cfb_mode::Decryptor::<Aes128>::new_from_slices(&key[..16], &iv)
                .map_err(invalid_key)?
                .decrypt(&mut buf);
        }
    }
    Ok(buf)
}

/// Pre-IV (key bytes 8..16) XOR salt.
fn des_iv(key: &[u8], salt: &[u8]) -> Result<[u8; 8], Error> {
    if salt.len() != 8 || key.len() < 16 {
        return Err(Error::protocol("invalid DES privacy parameters"));
    }
    let mut iv = [0u8; 8];
    for (i, b) in iv.iter_mut().enumerate() {
        *b = key[8 + i] ^ salt[i];
    }
    Ok(iv)
}

/// `boots || time || salt`
fn aes_iv(boots: u32, time: u32, salt: &[u8]) -> Result<[u8; 16], Error> {
    if salt.len() != 8 {
        return Err(Error::protocol("invalid AES privacy parameters"));
    }
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&boots.to_be_bytes());
    iv[4..8].copy_from_slice(&time.to_be_bytes());
    iv[8..].copy_from_slice(salt);
    Ok(iv)
}

// ── Encode / decode ──────────────────────────────────────────────────

/// Serialize a v3 message. Without keys it is sent `noAuthNoPriv`.
pub(crate) fn encode_message(
    msg_id: i32,
    reportable: bool,
    params: &SecurityParams,
    keys: Option<&LocalizedKeys>,
    salt: u64,
    scoped: &ScopedPdu,
) -> Result<Vec<u8>, Error> {
    let mut flags = keys.map_or(0, LocalizedKeys::flags);
    if reportable {
        flags |= FLAG_REPORTABLE;
    }

    let mut scoped_bytes = Vec::new();
    scoped.encode(&mut scoped_bytes);

    let mut priv_params = Vec::new();
    let msg_data = match keys.and_then(|k| k.privacy.as_ref()) {
        Some((proto, key)) => {
            let (ciphertext, salt_bytes) =
                encrypt(*proto, key, params.boots, params.time, salt, &scoped_bytes)?;
            priv_params = salt_bytes;
            let mut out = Vec::with_capacity(ciphertext.len() + 4);
            ber::write_tlv(TAG_OCTET_STRING, &ciphertext, &mut out);
            out
        }
        None => scoped_bytes,
    };

    let auth = keys.and_then(|k| k.auth.as_ref());
    let auth_len = auth.map_or(0, |(proto, _)| auth_len(*proto));

    let mut usm_content = Vec::new();
    ber::write_tlv(TAG_OCTET_STRING, &params.engine_id, &mut usm_content);
    ber::write_integer(TAG_INTEGER, i64::from(params.boots), &mut usm_content);
    ber::write_integer(TAG_INTEGER, i64::from(params.time), &mut usm_content);
    ber::write_tlv(TAG_OCTET_STRING, &params.username, &mut usm_content);
    ber::write_header(TAG_OCTET_STRING, auth_len, &mut usm_content);
    let auth_in_content = usm_content.len();
    usm_content.resize(usm_content.len() + auth_len, 0);
    ber::write_tlv(TAG_OCTET_STRING, &priv_params, &mut usm_content);

    let mut usm_seq = Vec::with_capacity(usm_content.len() + 4);
    let usm_header = ber::write_header(TAG_SEQUENCE, usm_content.len(), &mut usm_seq);
    usm_seq.extend_from_slice(&usm_content);

    let mut content = Vec::new();
    ber::write_integer(TAG_INTEGER, SNMP_V3, &mut content);
    ber::write_constructed(TAG_SEQUENCE, &mut content, |global| {
        ber::write_integer(TAG_INTEGER, i64::from(msg_id), global);
        ber::write_integer(TAG_INTEGER, MAX_MESSAGE_SIZE, global);
        ber::write_tlv(TAG_OCTET_STRING, &[flags], global);
        ber::write_integer(TAG_INTEGER, USM_SECURITY_MODEL, global);
    });
    ber::write_header(TAG_OCTET_STRING, usm_seq.len(), &mut content);
    let usm_start = content.len();
    content.extend_from_slice(&usm_seq);
    content.extend_from_slice(&msg_data);

    let mut message = Vec::with_capacity(content.len() + 4);
    let message_header = ber::write_header(TAG_SEQUENCE, content.len(), &mut message);
    message.extend_from_slice(&content);

    if let Some((proto, key)) = auth {
        let pos = message_header + usm_start + usm_header + auth_in_content;
        let digest = sign(*proto, key, &message)?;
        message[pos..pos + auth_len].copy_from_slice(&digest);
    }
    Ok(message)
}

/// Parse a v3 message, verifying and decrypting as its flags require.
pub(crate) fn decode_message(
    bytes: &[u8],
    keys: Option<&LocalizedKeys>,
) -> Result<DecodedMessage, Error> {
    let mut outer = Reader::new(bytes);
    let mut msg = outer.nested(TAG_SEQUENCE)?;
    if msg.read_integer()? != SNMP_V3 {
        return Err(Error::protocol("not an SNMPv3 message"));
    }

    let mut global = msg.nested(TAG_SEQUENCE)?;
    let msg_id = i32::try_from(global.read_integer()?)
        .map_err(|_| Error::protocol("msgID out of range"))?;
    let _max_size = global.read_integer()?;
    let flags = *global
        .read_octets()?
        .first()
        .ok_or_else(|| Error::protocol("empty msgFlags"))?;
    if global.read_integer()? != USM_SECURITY_MODEL {
        return Err(Error::protocol("unsupported security model"));
    }

    let sec_tlv = msg.expect(TAG_OCTET_STRING)?;
    let mut usm = Reader::at(sec_tlv).nested(TAG_SEQUENCE)?;
    let engine_id = usm.read_octets()?.to_vec();
    let boots = read_u32(&mut usm)?;
    let time = read_u32(&mut usm)?;
    let username = usm.read_octets()?.to_vec();
    let auth_tlv = usm.expect(TAG_OCTET_STRING)?;
    let priv_params = usm.read_octets()?.to_vec();
    let params = SecurityParams {
        engine_id,
        boots,
        time,
        username,
        auth_params: auth_tlv.content.to_vec(),
        priv_params,
    };

    if flags & FLAG_AUTH != 0 {
        let (proto, key) = keys
            .and_then(|k| k.auth.as_ref())
            .ok_or_else(|| Error::Authentication {
                message: "agent sent an authenticated message but no auth key is configured"
                    .into(),
            })?;
        let mut zeroed = bytes.to_vec();
        let span = auth_tlv.offset..auth_tlv.offset + auth_tlv.content.len();
        zeroed[span].fill(0);
        if !verify(*proto, key, &zeroed, auth_tlv.content)? {
            return Err(Error::Authentication {
                message: "response digest mismatch".into(),
            });
        }
    }

    let scoped = if flags & FLAG_PRIV != 0 {
        let (proto, key) = keys
            .and_then(|k| k.privacy.as_ref())
            .ok_or_else(|| Error::Authentication {
                message: "agent sent an encrypted message but no privacy key is configured"
                    .into(),
            })?;
        let ciphertext = msg.read_octets()?;
        let plaintext = decrypt(*proto, key, &params, ciphertext)?;
        ScopedPdu::decode(&mut Reader::new(&plaintext))?
    } else {
        ScopedPdu::decode(&mut msg)?
    };

    Ok(DecodedMessage {
        msg_id,
        flags,
        params,
        scoped,
    })
}

fn read_u32(reader: &mut Reader<'_>) -> Result<u32, Error> {
    u32::try_from(reader.read_integer()?).map_err(|_| Error::protocol("USM counter out of range"))
}

//! Frame obfuscation.
//!
//! An [`Obfuscator`] turns a [`Frame`] into the opaque body of one wire record
//! and back. The multiplexer never looks inside the body; record framing is
//! handled separately by [`crate::codec::FrameCodec`].
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::default::SESSION_KEY_LEN;
use crate::error::{MuxError, Result};
use crate::frame::Frame;

/// Capability turning frames into wire bytes and back.
pub trait Obfuscator: Send + Sync {
    /// Append the obfuscated body of `frame` to `dst`.
    fn obfuscate(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()>;
    /// Recover a frame from one obfuscated body.
    fn deobfuscate(&self, src: Bytes) -> Result<Frame>;
    /// Bytes added on top of the plain frame length.
    fn overhead(&self) -> usize {
        0
    }
}

/// Encryption methods understood by [`make_obfuscator`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMethod {
    Plain = 0x00,
    Aes256Gcm = 0x01,
    ChaCha20Poly1305 = 0x02,
}

impl TryFrom<u8> for EncryptionMethod {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(EncryptionMethod::Plain),
            0x01 => Ok(EncryptionMethod::Aes256Gcm),
            0x02 => Ok(EncryptionMethod::ChaCha20Poly1305),
            other => Err(MuxError::Crypto(format!("unknown encryption method {:#04x}", other))),
        }
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionMethod::Plain => write!(f, "plain"),
            EncryptionMethod::Aes256Gcm => write!(f, "aes-256-gcm"),
            EncryptionMethod::ChaCha20Poly1305 => write!(f, "chacha20-poly1305"),
        }
    }
}

/// Build the obfuscator for `method` keyed with the session key.
/// The key is ignored by [`EncryptionMethod::Plain`].
pub fn make_obfuscator(
    method: EncryptionMethod,
    session_key: [u8; SESSION_KEY_LEN],
) -> Result<Arc<dyn Obfuscator>> {
    let obfuscator: Arc<dyn Obfuscator> = match method {
        EncryptionMethod::Plain => Arc::new(PlainObfuscator),
        EncryptionMethod::Aes256Gcm => Arc::new(AeadObfuscator::new(&aead::AES_256_GCM, &session_key)?),
        EncryptionMethod::ChaCha20Poly1305 => {
            Arc::new(AeadObfuscator::new(&aead::CHACHA20_POLY1305, &session_key)?)
        }
    };
    tracing::debug!("Built {} obfuscator", method);
    Ok(obfuscator)
}

/// Writes the plain frame as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainObfuscator;

impl Obfuscator for PlainObfuscator {
    fn obfuscate(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        frame.write_to(dst);
        Ok(())
    }

    fn deobfuscate(&self, src: Bytes) -> Result<Frame> {
        Frame::from_bytes(src)
    }
}

/// Seals the whole plain frame with an AEAD cipher.
///
/// Body layout: `nonce (12) | ciphertext | tag (16)`. A fresh random nonce is
/// drawn per frame, so both directions may share one session key.
pub struct AeadObfuscator {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl AeadObfuscator {
    pub fn new(algorithm: &'static aead::Algorithm, key: &[u8]) -> Result<Self> {
        let unbound = UnboundKey::new(algorithm, key)
            .map_err(|_| MuxError::Crypto(format!("invalid {} byte key for {:?}", key.len(), algorithm)))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    fn tag_len(&self) -> usize {
        self.key.algorithm().tag_len()
    }
}

impl Obfuscator for AeadObfuscator {
    fn obfuscate(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| MuxError::Crypto("failed to draw nonce".into()))?;

        let mut body = BytesMut::with_capacity(frame.len() + self.tag_len());
        frame.write_to(&mut body);
        self.key
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut body)
            .map_err(|_| MuxError::Crypto("failed to seal frame".into()))?;

        dst.reserve(NONCE_LEN + body.len());
        dst.extend_from_slice(&nonce);
        dst.extend_from_slice(&body);
        Ok(())
    }

    fn deobfuscate(&self, src: Bytes) -> Result<Frame> {
        if src.len() < NONCE_LEN + self.tag_len() {
            return Err(MuxError::malformed(format!(
                "sealed record of {} bytes is too short",
                src.len()
            )));
        }
        let nonce = Nonce::try_assume_unique_for_key(&src[..NONCE_LEN])
            .map_err(|_| MuxError::malformed("bad nonce"))?;
        let mut body = BytesMut::from(&src[NONCE_LEN..]);
        let plain_len = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut body[..])
            .map_err(|_| MuxError::malformed("authentication failed"))?
            .len();
        body.truncate(plain_len);
        Frame::from_bytes(body.freeze())
    }

    fn overhead(&self) -> usize {
        NONCE_LEN + self.tag_len()
    }
}

impl fmt::Debug for AeadObfuscator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadObfuscator")
            .field("algorithm", self.key.algorithm())
            .finish()
    }
}

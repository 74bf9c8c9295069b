//! PII codec: reversible public-key encryption of tracking payloads.
//!
//! [`Codec`] is the narrow capability the tracker depends on. [`RsaCodec`]
//! implements it with RSA-OAEP over SHA-256: encoding needs only the public
//! key, decoding the private key, and every encoding of the same payload is
//! different.
//!
//! A tracking reference (`tr` query value) is
//! `base64url(Codec::encode(json(pii)))` without padding.

use std::{fmt, io, path::Path};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand_core::OsRng;
use rsa::{
  Oaep, RsaPrivateKey, RsaPublicKey,
  pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding},
  pkcs8::DecodePrivateKey,
  traits::PublicKeyParts,
};
use sha2::Sha256;

use crate::{CodecError, Result, pii::Pii};

/// SHA-256 output length, which determines the OAEP overhead.
const HASH_LEN: usize = 32;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Reversible encoding of small payloads into opaque bytes.
///
/// Implementations must fail closed: `decode` either returns exactly what
/// was encoded or an error.
pub trait Codec: Send + Sync {
  fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError>;

  fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError>;
}

// ─── RSA-OAEP ────────────────────────────────────────────────────────────────

/// RSA-OAEP (SHA-256) codec.
pub struct RsaCodec {
  public:  RsaPublicKey,
  private: Option<RsaPrivateKey>,
}

impl RsaCodec {
  pub const DEFAULT_BITS: usize = 2048;

  /// Generate a fresh key pair.
  pub fn generate(bits: usize) -> Result<Self, CodecError> {
    let private = RsaPrivateKey::new(&mut OsRng, bits)
      .map_err(|e| CodecError::KeyMissing(format!("key generation failed: {e}")))?;
    Ok(Self::from_private_key(private))
  }

  pub fn from_private_key(private: RsaPrivateKey) -> Self {
    Self { public: private.to_public_key(), private: Some(private) }
  }

  /// A codec that can encode but never decode.
  pub fn encrypt_only(public: RsaPublicKey) -> Self {
    Self { public, private: None }
  }

  /// Parse a PEM private key, PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8
  /// (`PRIVATE KEY`).
  pub fn from_pem(pem: &str) -> Result<Self, CodecError> {
    let private = RsaPrivateKey::from_pkcs1_pem(pem)
      .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
      .map_err(|e| CodecError::KeyMissing(format!("unreadable private key: {e}")))?;
    Ok(Self::from_private_key(private))
  }

  /// Load a PEM private key from `path`.
  pub fn load(path: &Path) -> Result<Self, CodecError> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
      CodecError::KeyMissing(format!("cannot read {}: {e}", path.display()))
    })?;
    Self::from_pem(&pem)
  }

  /// Write the private key to `path` as PKCS#1 PEM.
  pub fn write_private_key(&self, path: &Path) -> io::Result<()> {
    let private = self
      .private
      .as_ref()
      .ok_or_else(|| io::Error::other("codec holds no private key"))?;
    let pem = private.to_pkcs1_pem(LineEnding::LF).map_err(io::Error::other)?;
    std::fs::write(path, pem.as_bytes())
  }

  pub fn public_key(&self) -> &RsaPublicKey { &self.public }

  /// Largest plaintext `encode` accepts: `k - 2·hLen - 2` bytes.
  pub fn max_plaintext_len(&self) -> usize {
    self.public.size().saturating_sub(2 * HASH_LEN + 2)
  }
}

impl fmt::Debug for RsaCodec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RsaCodec")
      .field("bits", &(self.public.size() * 8))
      .field("can_decode", &self.private.is_some())
      .finish()
  }
}

impl Codec for RsaCodec {
  fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let max = self.max_plaintext_len();
    if plaintext.len() > max {
      return Err(CodecError::PayloadTooLarge { len: plaintext.len(), max });
    }
    self
      .public
      .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
      .map_err(|e| CodecError::EncodeFailed(e.to_string()))
  }

  fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
    let private = self
      .private
      .as_ref()
      .ok_or_else(|| CodecError::KeyMissing("codec holds no private key".into()))?;
    private
      .decrypt(Oaep::new::<Sha256>(), encoded)
      .map_err(|e| CodecError::DecodeFailed(e.to_string()))
  }
}

// ─── Tracking references ─────────────────────────────────────────────────────

/// Encode `pii` into an opaque, URL-safe tracking reference.
pub fn encode_reference(codec: &dyn Codec, pii: &Pii) -> Result<String> {
  let json = serde_json::to_vec(pii)?;
  let encoded = codec.encode(&json)?;
  Ok(URL_SAFE_NO_PAD.encode(encoded))
}

/// Recover the PII from a tracking reference produced by
/// [`encode_reference`].
pub fn decode_reference(codec: &dyn Codec, reference: &str) -> Result<Pii> {
  let encoded = URL_SAFE_NO_PAD
    .decode(reference.trim())
    .map_err(|e| CodecError::DecodeFailed(format!("invalid base64: {e}")))?;
  let json = codec.decode(&encoded)?;
  let pii = serde_json::from_slice(&json)
    .map_err(|e| CodecError::DecodeFailed(format!("invalid payload: {e}")))?;
  Ok(pii)
}

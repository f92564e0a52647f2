//! RSA-OAEP (SHA-1) sealing of request bodies
//!
//! A single OAEP block holds at most `key_size - 42` bytes, so plaintext is
//! split into chunks of that size and the ciphertext blocks (each exactly
//! `key_size` bytes) are concatenated. The receiver splits on the key size.
//!
//! Keys are PEM files: SubjectPublicKeyInfo for the public half (agent) and
//! PKCS#8 for the private half (server).

use std::fmt;
use std::path::Path;

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

/// Bytes lost to OAEP padding with SHA-1 (2 * 20 + 2)
const OAEP_SHA1_OVERHEAD: usize = 42;

const CHECK_MESSAGE: &[u8] = b"ping";

#[derive(Debug)]
pub enum SealError {
    /// Key file could not be read
    Io(std::io::Error),

    /// Key material could not be parsed
    InvalidKey(String),

    /// Ciphertext length is not a whole number of blocks
    Malformed { len: usize, block: usize },

    /// Encryption or decryption failed
    Crypto(rsa::Error),

    /// Start-up self check produced an unexpected result
    SelfCheck(String),
}

impl fmt::Display for SealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SealError::Io(err) => write!(f, "failed to read key file: {}", err),
            SealError::InvalidKey(msg) => write!(f, "invalid RSA key: {}", msg),
            SealError::Malformed { len, block } => write!(
                f,
                "ciphertext of {} bytes is not a multiple of the {}-byte block",
                len, block
            ),
            SealError::Crypto(err) => write!(f, "RSA-OAEP failure: {}", err),
            SealError::SelfCheck(msg) => write!(f, "key self check failed: {}", msg),
        }
    }
}

impl std::error::Error for SealError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SealError::Io(err) => Some(err),
            SealError::Crypto(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rsa::Error> for SealError {
    fn from(err: rsa::Error) -> Self {
        SealError::Crypto(err)
    }
}

/// Recipient key used by the agent
#[derive(Debug, Clone)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    pub fn from_pem(pem: &str) -> Result<Self, SealError> {
        RsaPublicKey::from_public_key_pem(pem)
            .map(Self)
            .map_err(|e| SealError::InvalidKey(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SealError> {
        let pem = std::fs::read_to_string(path).map_err(SealError::Io)?;
        Self::from_pem(&pem)
    }

    /// Size of one ciphertext block in bytes
    pub fn block_size(&self) -> usize {
        self.0.size()
    }

    /// Largest plaintext chunk one block can carry
    pub fn chunk_size(&self) -> usize {
        self.block_size().saturating_sub(OAEP_SHA1_OVERHEAD)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        let chunk_size = self.chunk_size();
        if chunk_size == 0 {
            return Err(SealError::InvalidKey("key too small for OAEP/SHA-1".to_string()));
        }

        let mut rng = rand::thread_rng();
        let mut sealed = Vec::with_capacity(
            plaintext.len().div_ceil(chunk_size) * self.block_size(),
        );

        for chunk in plaintext.chunks(chunk_size) {
            let block = self.0.encrypt(&mut rng, Oaep::new::<Sha1>(), chunk)?;
            sealed.extend_from_slice(&block);
        }

        Ok(sealed)
    }

    /// Seal a short message and check the block shape
    pub fn self_check(&self) -> Result<(), SealError> {
        let sealed = self.seal(CHECK_MESSAGE)?;
        if sealed.len() != self.block_size() {
            return Err(SealError::SelfCheck(format!(
                "expected one {}-byte block, got {} bytes",
                self.block_size(),
                sealed.len()
            )));
        }
        Ok(())
    }
}

/// Key used by the server to open sealed bodies
#[derive(Debug, Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    pub fn from_pem(pem: &str) -> Result<Self, SealError> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .map(Self)
            .map_err(|e| SealError::InvalidKey(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SealError> {
        let pem = std::fs::read_to_string(path).map_err(SealError::Io)?;
        Self::from_pem(&pem)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
        let block = self.0.size();
        if sealed.len() % block != 0 {
            return Err(SealError::Malformed {
                len: sealed.len(),
                block,
            });
        }

        let mut opened = Vec::with_capacity(sealed.len());
        for chunk in sealed.chunks(block) {
            opened.extend(self.0.decrypt(Oaep::new::<Sha1>(), chunk)?);
        }

        Ok(opened)
    }

    /// Full seal/open round trip with the matching public key
    pub fn self_check(&self) -> Result<(), SealError> {
        let opened = self.open(&self.public_key().seal(CHECK_MESSAGE)?)?;
        if opened != CHECK_MESSAGE {
            return Err(SealError::SelfCheck("round trip changed the message".to_string()));
        }
        Ok(())
    }
}

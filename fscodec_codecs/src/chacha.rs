//! ChaCha20 confidentiality service with HKDF-SHA256 per-file keys

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use fscodec_core::{ConfidentialityService, FileContext, ServiceError};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const MASTER_SALT: &[u8] = b"fscodec-master-salt";
const MASTER_INFO: &[u8] = b"fscodec-master-key";
const FILE_INFO: &[u8] = b"fscodec-file-key";

/// 256-bit master key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Stretch a passphrase into a master key with HKDF-SHA256.
    pub fn from_passphrase(passphrase: &[u8]) -> Result<Self, ServiceError> {
        let hk = Hkdf::<Sha256>::new(Some(MASTER_SALT), passphrase);
        let mut okm = [0u8; 32];
        hk.expand(MASTER_INFO, &mut okm)
            .map_err(|e| ServiceError::Backend(format!("hkdf: {}", e)))?;
        Ok(Self(okm))
    }
}

/// Length-preserving stream encryption of file blocks.
///
/// Each file gets its own key, `HKDF(master, "fscodec-file-key" || ino)`.
/// The 96-bit nonce is the block tweak (little endian) padded with zeros, so
/// every `(file, block)` pair has a distinct keystream. There is no
/// authentication tag: block size is preserved on disk.
#[derive(Debug)]
pub struct ChaChaService {
    master: MasterKey,
}

impl ChaChaService {
    pub fn new(master: MasterKey) -> Self {
        Self { master }
    }

    fn file_key(&self, ctx: &FileContext) -> Result<Zeroizing<[u8; 32]>, ServiceError> {
        let hk = Hkdf::<Sha256>::new(None, &self.master.0);
        let mut info = Vec::with_capacity(FILE_INFO.len() + 8);
        info.extend_from_slice(FILE_INFO);
        info.extend_from_slice(&ctx.ino.to_le_bytes());
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(&info, &mut *okm)
            .map_err(|e| ServiceError::Backend(format!("hkdf: {}", e)))?;
        Ok(okm)
    }

    fn apply_keystream(
        &self,
        ctx: &FileContext,
        buf: &mut [u8],
        tweak: u64,
    ) -> Result<(), ServiceError> {
        let key = self.file_key(ctx)?;
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&tweak.to_le_bytes());
        let mut cipher = ChaCha20::new(&(*key).into(), &nonce.into());
        cipher.apply_keystream(buf);
        Ok(())
    }
}

impl ConfidentialityService for ChaChaService {
    fn encrypt(
        &self,
        ctx: &FileContext,
        plaintext: &[u8],
        tweak: u64,
    ) -> Result<Vec<u8>, ServiceError> {
        let mut out = plaintext.to_vec();
        self.apply_keystream(ctx, &mut out, tweak)?;
        Ok(out)
    }

    fn decrypt_in_place(
        &self,
        ctx: &FileContext,
        block: &mut [u8],
        tweak: u64,
    ) -> Result<(), ServiceError> {
        self.apply_keystream(ctx, block, tweak)
    }
}

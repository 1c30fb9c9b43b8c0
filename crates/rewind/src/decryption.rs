// Segment decryption: AES-128-CBC with a single static key per mission.

use std::path::Path;

use aes::Aes128;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use tracing::{debug, info};

use crate::{Result, RewindError};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// IV as carried by the playlist or supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iv {
    /// Hex text, `0x` prefix optional.
    Hex(String),
    /// Raw bytes, used as-is.
    Raw(Vec<u8>),
}

/// What [`Decryptor::decrypt_file`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptOutcome {
    Decrypted,
    /// A decrypted copy of matching size already existed.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Decryptor {
    key: [u8; 16],
    iv: Vec<u8>,
}

impl Decryptor {
    pub fn new(key: &[u8], iv: Option<&Iv>) -> Result<Self> {
        let key: [u8; 16] = key.try_into().map_err(|_| {
            RewindError::decryption(format!(
                "key has {} bytes, AES-128 needs 16",
                key.len()
            ))
        })?;
        Ok(Self {
            key,
            iv: resolve_iv(iv)?,
        })
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        decrypt_buffer(&self.key, &self.iv, data.to_vec())
    }

    /// Decrypt `src` into `dst` on the blocking pool. Skipped when `dst`
    /// already exists with the same size as `src`.
    pub async fn decrypt_file(&self, src: &Path, dst: &Path) -> Result<DecryptOutcome> {
        if src == dst {
            return Err(RewindError::decryption(format!(
                "refusing to decrypt {} onto itself",
                src.display()
            )));
        }

        let src_len = tokio::fs::metadata(src).await?.len();
        if let Ok(existing) = tokio::fs::metadata(dst).await
            && existing.len() == src_len
        {
            debug!(path = %dst.display(), "Decrypted copy already present");
            return Ok(DecryptOutcome::Skipped);
        }

        let data = tokio::fs::read(src).await?;
        let key = self.key;
        let iv = self.iv.clone();
        let plain = tokio::task::spawn_blocking(move || decrypt_buffer(&key, &iv, data))
            .await
            .map_err(|e| RewindError::decryption(format!("decryption task failed: {e}")))??;

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dst, plain).await?;
        info!(path = %dst.display(), "Segment decrypted");
        Ok(DecryptOutcome::Decrypted)
    }
}

/// Absent or empty IV means all zeroes; hex must decode to exactly 16 bytes.
pub fn resolve_iv(iv: Option<&Iv>) -> Result<Vec<u8>> {
    match iv {
        None => Ok(vec![0u8; 16]),
        Some(Iv::Raw(bytes)) if bytes.is_empty() => Ok(vec![0u8; 16]),
        Some(Iv::Raw(bytes)) => Ok(bytes.clone()),
        Some(Iv::Hex(text)) => {
            let hex_str = text.trim();
            let hex_str = hex_str
                .strip_prefix("0x")
                .or_else(|| hex_str.strip_prefix("0X"))
                .unwrap_or(hex_str);
            if hex_str.is_empty() {
                return Ok(vec![0u8; 16]);
            }
            let mut iv_bytes = [0u8; 16];
            hex::decode_to_slice(hex_str, &mut iv_bytes).map_err(|e| RewindError::IvFormat {
                iv: text.clone(),
                reason: e.to_string(),
            })?;
            Ok(iv_bytes.to_vec())
        }
    }
}

fn decrypt_buffer(key: &[u8; 16], iv: &[u8], mut buffer: Vec<u8>) -> Result<Vec<u8>> {
    let cipher = Aes128CbcDec::new_from_slices(key, iv).map_err(|e| {
        RewindError::decryption(format!("Failed to initialize AES decryptor: {e}"))
    })?;
    let len = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|e| RewindError::decryption(format!("Decryption failed: {e}")))?
        .len();
    buffer.truncate(len);
    strip_padding(&mut buffer);
    Ok(buffer)
}

/// Drop a trailing PKCS#7 pad when one is present; otherwise leave the data alone.
fn strip_padding(buffer: &mut Vec<u8>) {
    let Some(&pad) = buffer.last() else {
        return;
    };
    let n = usize::from(pad);
    if (1..=16).contains(&n)
        && n <= buffer.len()
        && buffer[buffer.len() - n..].iter().all(|b| *b == pad)
    {
        buffer.truncate(buffer.len() - n);
    }
}

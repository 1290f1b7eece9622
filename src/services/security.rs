use crate::constants::crypto::{IV_SIZE, KEY_SIZE, TAG_SIZE};
use crate::constants::env as env_keys;
use crate::errors::ProbeError;
use crate::utils::fs_atomic::ensure_dir_for_file;
use crate::utils::paths::resolve_registry_key_path;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

fn decode_key(raw: &str) -> Option<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.len() == KEY_SIZE * 2 {
        if let Ok(bytes) = hex::decode(trimmed) {
            return Some(bytes);
        }
    }
    if trimmed.len() == KEY_SIZE {
        return Some(trimmed.as_bytes().to_vec());
    }
    let engine = base64::engine::general_purpose::STANDARD;
    if let Ok(bytes) = engine.decode(trimmed.as_bytes()) {
        if bytes.len() == KEY_SIZE {
            return Some(bytes);
        }
    }
    Some(Sha256::digest(trimmed.as_bytes()).to_vec())
}

#[derive(Clone)]
pub struct Security {
    cipher: Aes256Gcm,
}

impl Security {
    pub fn new() -> Result<Self, ProbeError> {
        let key_path = resolve_registry_key_path();
        let secret_key = Self::load_or_create_secret(&key_path)?;
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&secret_key);
        let cipher = Aes256Gcm::new(key);
        Ok(Self { cipher })
    }

    fn load_or_create_secret(path: &PathBuf) -> Result<Vec<u8>, ProbeError> {
        if let Ok(raw) = std::env::var(env_keys::ENCRYPTION_KEY) {
            if let Some(decoded) = decode_key(&raw) {
                return Ok(decoded);
            }
        }

        if path.exists() {
            if let Ok(stored) = fs::read_to_string(path) {
                if let Some(decoded) = decode_key(&stored) {
                    return Ok(decoded);
                }
            }
        }

        let mut generated = vec![0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut generated);
        let _ = ensure_dir_for_file(path);
        if let Ok(mut file) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
        {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = file.set_permissions(fs::Permissions::from_mode(0o600));
            }
            let _ = file.write_all(hex::encode(&generated).as_bytes());
        }
        Ok(generated)
    }

    pub fn encrypt(&self, text: &str) -> Result<String, ProbeError> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        let nonce = aes_gcm::Nonce::from_slice(&iv);
        let mut ciphertext = self
            .cipher
            .encrypt(nonce, text.as_bytes())
            .map_err(|_| ProbeError::internal("Failed to encrypt stored secret"))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(ProbeError::internal("Failed to encrypt stored secret"));
        }
        let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, payload: &str) -> Result<String, ProbeError> {
        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() != 3 {
            return Err(
                ProbeError::invalid_input("Invalid encrypted payload format")
                    .with_hint("Expected format: \"<iv_hex>:<tag_hex>:<data_hex>\".".to_string()),
            );
        }
        let iv = hex::decode(parts[0])
            .map_err(|_| ProbeError::invalid_input("Invalid encrypted payload format"))?;
        let tag = hex::decode(parts[1])
            .map_err(|_| ProbeError::invalid_input("Invalid encrypted payload format"))?;
        let data = hex::decode(parts[2])
            .map_err(|_| ProbeError::invalid_input("Invalid encrypted payload format"))?;
        if tag.len() != TAG_SIZE {
            return Err(ProbeError::invalid_input("Invalid auth tag length"));
        }
        let mut combined = Vec::with_capacity(data.len() + tag.len());
        combined.extend_from_slice(&data);
        combined.extend_from_slice(&tag);
        let nonce = aes_gcm::Nonce::from_slice(&iv);
        let decrypted = self
            .cipher
            .decrypt(nonce, combined.as_ref())
            .map_err(|_| {
                ProbeError::internal("Failed to decrypt stored secret").with_hint(format!(
                    "Ensure {} (or the persisted key file) matches the key used when the secret was stored.",
                    env_keys::ENCRYPTION_KEY
                ))
            })?;
        Ok(String::from_utf8_lossy(&decrypted).to_string())
    }
}

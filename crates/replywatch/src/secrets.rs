//! Secret resolution and at-rest encryption of OAuth tokens.
//!
//! Secrets such as the webhook client state or the OAuth client secret can be
//! given inline, read from a mounted file, or taken from an environment
//! variable. The first non-empty source wins.

use std::fs;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source configured (value, file or env var)")]
    NoSourceProvided,

    #[error("Failed to read secret file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' is not valid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid token key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a secret may come from, as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl SecretSource {
    pub fn from_env_var(name: &str) -> Self {
        Self {
            env_var: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        has_secret_source(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }

    pub fn resolve(&self) -> Result<SecretString> {
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }
}

/// Resolves a secret from, in order: a direct value, a file, an env var.
///
/// Empty strings count as "not provided". File and env var contents are
/// trimmed.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|source| SecretError::FileRead {
            path: expanded.clone(),
            source,
        })?;
        return Ok(SecretString::from(content.trim().to_string()));
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    [direct, file_path, env_var]
        .iter()
        .any(|s| s.is_some_and(|v| !v.is_empty()))
}

/// Expands a leading `~` (alone or as `~/...`) to the home directory.
pub fn expand_home(path: &str) -> String {
    if path != "~" && !path.starts_with("~/") {
        return path.to_string();
    }
    match dirs::home_dir() {
        Some(home) => path.replacen('~', &home.to_string_lossy(), 1),
        None => path.to_string(),
    }
}

/// Env var holding the 64-hex-char AES-256 key for token encryption.
pub const TOKEN_KEY_ENV_VAR: &str = "REPLYWATCH_TOKEN_KEY";

const NONCE_SIZE: usize = 12;

/// AES-256-GCM encryptor for OAuth tokens stored in `oauth_tokens`.
///
/// Ciphertext is hex of `nonce || sealed bytes`.
pub struct TokenEncryptor {
    cipher: Aes256Gcm,
}

impl TokenEncryptor {
    /// Builds an encryptor from `REPLYWATCH_TOKEN_KEY`, or `None` when unset.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(TOKEN_KEY_ENV_VAR) {
            Ok(key) if !key.trim().is_empty() => Self::from_hex_key(key.trim()).map(Some),
            _ => Ok(None),
        }
    }

    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key = hex_decode(key_hex).map_err(SecretError::InvalidKey)?;
        if key.len() != 32 {
            return Err(SecretError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::fill(&mut nonce_bytes)
            .map_err(|e| SecretError::Encryption(format!("no randomness: {}", e)))?;

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| SecretError::Encryption(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(sealed);
        Ok(hex_encode(&combined))
    }

    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let combined = hex_decode(ciphertext_hex).map_err(SecretError::Decryption)?;
        if combined.len() < NONCE_SIZE {
            return Err(SecretError::Decryption("ciphertext too short".to_string()));
        }
        let (nonce, sealed) = combined.split_at(NONCE_SIZE);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| SecretError::Decryption(e.to_string()))?;
        String::from_utf8(plain).map_err(|e| SecretError::Decryption(e.to_string()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err("hex string must be ASCII with even length".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("invalid hex at {}: {}", i, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    #[serial]
    fn test_priority_order() {
        std::env::set_var("RW_TEST_SECRET_A", "from-env");
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();
        let path = file.path().to_str().unwrap();

        let direct = resolve_secret(Some("inline"), Some(path), Some("RW_TEST_SECRET_A")).unwrap();
        assert_eq!(direct.expose_secret(), "inline");

        let from_file = resolve_secret(Some(""), Some(path), Some("RW_TEST_SECRET_A")).unwrap();
        assert_eq!(from_file.expose_secret(), "from-file");

        let from_env = resolve_secret(None, None, Some("RW_TEST_SECRET_A")).unwrap();
        assert_eq!(from_env.expose_secret(), "from-env");

        std::env::remove_var("RW_TEST_SECRET_A");
    }

    #[test]
    fn test_missing_sources() {
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(matches!(
            resolve_secret(None, Some("/nonexistent/replywatch/secret"), None),
            Err(SecretError::FileRead { .. })
        ));
        assert!(matches!(
            resolve_secret(None, None, Some("RW_DEFINITELY_UNSET_98765")),
            Err(SecretError::EnvVarNotSet { .. })
        ));
    }

    #[test]
    fn test_secret_source_is_configured() {
        assert!(!SecretSource::default().is_configured());
        assert!(SecretSource::from_env_var("X").is_configured());
        let blank = SecretSource {
            value: Some(String::new()),
            ..SecretSource::default()
        };
        assert!(!blank.is_configured());
    }

    #[test]
    fn test_encryptor_round_trip_uses_fresh_nonce() {
        let enc = TokenEncryptor::from_hex_key(TEST_KEY).unwrap();
        let a = enc.encrypt("access-token").unwrap();
        let b = enc.encrypt("access-token").unwrap();
        assert_ne!(a, b);
        assert_eq!(enc.decrypt(&a).unwrap(), "access-token");
        assert_eq!(enc.decrypt(&b).unwrap(), "access-token");
    }

    #[test]
    fn test_encryptor_rejects_bad_input() {
        assert!(matches!(
            TokenEncryptor::from_hex_key("abcd"),
            Err(SecretError::InvalidKey(_))
        ));
        assert!(matches!(
            TokenEncryptor::from_hex_key("zz"),
            Err(SecretError::InvalidKey(_))
        ));

        let enc = TokenEncryptor::from_hex_key(TEST_KEY).unwrap();
        assert!(enc.decrypt("aabb").is_err());

        let mut tampered = hex_decode(&enc.encrypt("token").unwrap()).unwrap();
        if let Some(last) = tampered.last_mut() {
            *last ^= 0xff;
        }
        assert!(matches!(
            enc.decrypt(&hex_encode(&tampered)),
            Err(SecretError::Decryption(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_absent_is_none() {
        std::env::remove_var(TOKEN_KEY_ENV_VAR);
        assert!(TokenEncryptor::from_env().unwrap().is_none());

        std::env::set_var(TOKEN_KEY_ENV_VAR, TEST_KEY);
        assert!(TokenEncryptor::from_env().unwrap().is_some());
        std::env::remove_var(TOKEN_KEY_ENV_VAR);
    }
}

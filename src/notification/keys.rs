use std::{fs, io, path::Path};

use anyhow::{Context, bail, ensure};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use p256::ecdsa::SigningKey;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use web_push::VapidSignatureBuilder;

use crate::{
    cfg::Config,
    error::{RelayError, Result},
};

const NOT_CONFIGURED: &str = "VAPID keys not configured";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VapidKeys {
    pub public_key: String,
    pub private_key: String,
}

impl VapidKeys {
    /// Fresh P-256 pair: raw 32-byte scalar and 65-byte uncompressed point,
    /// both base64url without padding.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let public = signing_key.verifying_key().to_encoded_point(false);
        VapidKeys {
            public_key: URL_SAFE_NO_PAD.encode(public.as_bytes()),
            private_key: URL_SAFE_NO_PAD.encode(signing_key.to_bytes()),
        }
    }

    /// Returns the pair in the form the push client signs with: URL-safe
    /// base64 without padding, public key as a `0x04`-prefixed point.
    /// Fails when the public half does not belong to the private half.
    pub fn canonical(&self) -> anyhow::Result<VapidKeys> {
        let mut public = decode_key(&self.public_key).context("public key is not base64url")?;
        match public.len() {
            65 if public[0] == 0x04 => {}
            64 => public.insert(0, 0x04),
            n => bail!("public key must be an uncompressed P-256 point, got {n} bytes"),
        }
        let private = decode_key(&self.private_key).context("private key is not base64url")?;
        ensure!(
            private.len() == 32,
            "private key must be 32 bytes, got {}",
            private.len()
        );

        let private_key = URL_SAFE_NO_PAD.encode(&private);
        let derived = VapidSignatureBuilder::from_base64_no_sub(&private_key)
            .map_err(|e| anyhow::anyhow!("private key is not a P-256 scalar: {e}"))?
            .get_public_key();
        ensure!(derived == public, "public key does not match private key");

        Ok(VapidKeys {
            public_key: URL_SAFE_NO_PAD.encode(&public),
            private_key,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.canonical().map(|_| ())
    }
}

fn decode_key(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = raw.trim().trim_end_matches('=');
    URL_SAFE_NO_PAD.decode(trimmed.replace('+', "-").replace('/', "_"))
}

/// Writes `keys` as the `{ publicKey, privateKey }` key file. An existing
/// file is only replaced when `overwrite` is set.
pub fn write_key_file(path: &Path, keys: &VapidKeys, overwrite: bool) -> anyhow::Result<()> {
    if !overwrite && path.exists() {
        bail!("{} already exists", path.display());
    }
    let raw = serde_json::to_string_pretty(keys).context("serialize keys")?;
    fs::write(path, raw).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    File(String),
}

/// VAPID credentials loaded once at start and shared by every dispatch.
#[derive(Debug, Clone)]
pub struct KeyProvider {
    keys: Option<VapidKeys>,
    source: Option<KeySource>,
    subject: String,
}

impl KeyProvider {
    /// Environment keys win when both halves are set, otherwise the key file
    /// is read. Never fails: missing or broken material leaves the provider
    /// unconfigured.
    pub fn load(cfg: &Config) -> Self {
        let from_env = match (&cfg.vapid_public_key, &cfg.vapid_private_key) {
            (Some(public_key), Some(private_key)) => Some(VapidKeys {
                public_key: public_key.clone(),
                private_key: private_key.clone(),
            }),
            _ => None,
        };

        let (keys, source) = match from_env {
            Some(keys) => (Some(keys), Some(KeySource::Environment)),
            None => match read_key_file(&cfg.vapid_file) {
                Ok(Some(keys)) => (
                    Some(keys),
                    Some(KeySource::File(cfg.vapid_file.display().to_string())),
                ),
                Ok(None) => {
                    warn!(
                        file = %cfg.vapid_file.display(),
                        "No VAPID key file and no VAPID_PUBLIC_KEY/VAPID_PRIVATE_KEY, push sending is disabled"
                    );
                    (None, None)
                }
                Err(e) => {
                    error!(file = %cfg.vapid_file.display(), error = %format!("{e:#}"), "Failed to read VAPID key file");
                    (None, None)
                }
            },
        };

        let keys = keys.and_then(|k| match k.canonical() {
            Ok(k) => Some(k),
            Err(e) => {
                error!(error = %format!("{e:#}"), "Ignoring invalid VAPID key material");
                None
            }
        });

        if let (Some(k), Some(src)) = (&keys, &source) {
            info!(source = ?src, public_key = %k.public_key, "VAPID keys loaded");
        }

        KeyProvider {
            source: keys.as_ref().and(source),
            keys,
            subject: cfg.vapid_subject.clone(),
        }
    }

    pub fn from_keys(keys: VapidKeys, subject: impl Into<String>) -> Self {
        KeyProvider {
            keys: Some(keys),
            source: Some(KeySource::Environment),
            subject: subject.into(),
        }
    }

    pub fn unconfigured() -> Self {
        KeyProvider {
            keys: None,
            source: None,
            subject: crate::cfg::DEFAULT_VAPID_SUBJECT.to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.keys.is_some()
    }

    pub fn keys(&self) -> Result<&VapidKeys> {
        self.keys
            .as_ref()
            .ok_or_else(|| RelayError::Configuration(NOT_CONFIGURED.into()))
    }

    pub fn public_key(&self) -> Result<&str> {
        self.keys().map(|k| k.public_key.as_str())
    }

    pub fn source(&self) -> Option<&KeySource> {
        self.source.as_ref()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

fn read_key_file(path: &Path) -> anyhow::Result<Option<VapidKeys>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("read key file"),
    };
    let keys = serde_json::from_str(&raw).context("parse key file")?;
    Ok(Some(keys))
}

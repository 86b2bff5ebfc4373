//! RSA signing key pairs, persisted as PKCS#1 PEM files and generated on first use.

use anyhow::Context;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::{
    RsaPrivateKey,
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding},
    traits::PublicKeyParts,
};
use std::{fmt, fs, path::Path};
use tracing::info;

/// Key id of the pair signing API access tokens.
pub const API_KEY_ID: &str = "api-access";
/// Key id of the pair signing session cookies.
pub const LOGIN_KEY_ID: &str = "standalone-login";

pub const API_KEY_FILE: &str = "api.pem";
pub const LOGIN_KEY_FILE: &str = "login.pem";

const KEY_BITS: usize = 2048;

/// An RSA key pair identified by the `kid` placed in token headers.
#[derive(Clone)]
pub struct KeyPair {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("kid", &self.kid).finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Load the key pair stored in `home/file`, generating and persisting a new one if the
    /// file does not exist yet.
    pub fn load_or_generate(home: &Path, file: &str, kid: &str) -> anyhow::Result<Self> {
        let path = home.join(file);

        if path.exists() {
            let pem = fs::read_to_string(&path).with_context(|| format!("read key file {}", path.display()))?;
            info!("Loaded signing key '{}' from {}", kid, path.display());
            return Self::from_pem(kid, &pem);
        }

        fs::create_dir_all(home).with_context(|| format!("create key home {}", home.display()))?;
        let pem = generate_pem()?;
        fs::write(&path, pem.as_bytes()).with_context(|| format!("write key file {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        info!("Generated signing key '{}' at {}", kid, path.display());

        Self::from_pem(kid, &pem)
    }

    /// Build a key pair from a PKCS#1 PEM encoded private key.
    pub fn from_pem(kid: &str, pem: &str) -> anyhow::Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem).context("parse RSA private key")?;
        let public_key = private_key.to_public_key();

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        Ok(Self {
            kid: kid.to_string(),
            encoding: EncodingKey::from_rsa_pem(pem.as_bytes()).context("load RSA signing key")?,
            decoding: DecodingKey::from_rsa_components(&n, &e).context("load RSA verification key")?,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

/// Generate a fresh 2048-bit RSA private key as PKCS#1 PEM.
pub fn generate_pem() -> anyhow::Result<String> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS).context("generate RSA key")?;
    let pem = private_key.to_pkcs1_pem(LineEnding::LF).context("encode RSA key")?;
    Ok(pem.to_string())
}

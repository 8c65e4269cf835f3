//! Key material and browser fixtures

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use sqlmux_auth::BrowserLauncher;

/// One 2048-bit key per test binary; generation is slow
pub fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key")
    })
}

/// Write `key` as PKCS#8 PEM under `dir`, encrypted when `passphrase` is set
pub fn write_private_key(dir: &Path, key: &RsaPrivateKey, passphrase: Option<&str>) -> PathBuf {
    let pem = match passphrase {
        Some(passphrase) => {
            let mut rng = rand::thread_rng();
            key.to_pkcs8_encrypted_pem(&mut rng, passphrase.as_bytes(), LineEnding::LF)
                .expect("encrypt key")
        }
        None => key.to_pkcs8_pem(LineEnding::LF).expect("encode key"),
    };

    let path = dir.join("rsa_key.p8");
    std::fs::write(&path, pem.as_bytes()).expect("write key file");
    path
}

/// Plays the IdP: follows the SSO URL with a plain HTTP GET, which lands
/// on the loopback callback listener
#[derive(Clone, Default)]
pub struct RedirectingBrowser {
    opened: Arc<Mutex<Vec<String>>>,
}

impl RedirectingBrowser {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl BrowserLauncher for RedirectingBrowser {
    fn open(&self, url: &str) -> Result<(), String> {
        self.opened.lock().push(url.to_string());
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = reqwest::get(&url).await {
                tracing::warn!("redirect to {} failed: {}", url, e);
            }
        });
        Ok(())
    }
}

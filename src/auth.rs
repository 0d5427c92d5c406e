use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, bail, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::settings::SettingsStore;

const SALT_LEN: usize = 16;

/// Salted SHA-256, encoded as `hex(salt)$hex(digest)`.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{}${}", hex::encode(salt), hex::encode(digest(&salt, password)))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };
    constant_time_eq(&digest(&salt, password), &expected)
}

fn digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Password gate for administrative operations, with an agent-wide session flag.
pub struct Authenticator {
    settings: Arc<SettingsStore>,
    authenticated: AtomicBool,
}

impl Authenticator {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            authenticated: AtomicBool::new(false),
        }
    }

    pub fn has_password(&self) -> bool {
        self.settings.password_hash().is_some()
    }

    /// Sets the first password. Changing an existing one is not supported here.
    pub fn set_password(&self, password: &str) -> Result<()> {
        if self.has_password() {
            bail!("password already set");
        }
        if password.is_empty() {
            bail!("password must not be empty");
        }
        self.settings.set_password_hash(hash_password(password))?;
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Checks `password` without touching the session flag.
    pub fn check(&self, password: &str) -> bool {
        self.settings
            .password_hash()
            .map(|stored| verify_password(password, &stored))
            .unwrap_or(false)
    }

    pub fn login(&self, password: &str) -> bool {
        let ok = self.check(password);
        if ok {
            self.authenticated.store(true, Ordering::SeqCst);
        }
        ok
    }

    pub fn logout(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Errors with `invalid password` unless `password` matches.
    pub fn require(&self, password: &str) -> Result<()> {
        if self.check(password) {
            Ok(())
        } else {
            Err(anyhow!("invalid password"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> (tempfile::TempDir, Authenticator) {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        (dir, Authenticator::new(Arc::new(settings)))
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("hunter2");
        let b = hash_password("hunter2");
        assert_ne!(a, b);
        assert!(verify_password("hunter2", &a));
        assert!(verify_password("hunter2", &b));
        assert!(!verify_password("hunter3", &a));
        assert!(!verify_password("hunter2", "garbage"));
    }

    #[test]
    fn session_follows_login_and_logout() {
        let (_dir, auth) = authenticator();
        assert!(!auth.has_password());
        assert!(!auth.login("anything"));

        auth.set_password("secret").unwrap();
        assert!(auth.is_authenticated());
        assert!(auth.set_password("other").is_err());

        auth.logout();
        assert!(!auth.is_authenticated());
        assert!(!auth.login("wrong"));
        assert!(auth.login("secret"));
        assert!(auth.is_authenticated());
    }

    #[test]
    fn require_reports_invalid_password() {
        let (_dir, auth) = authenticator();
        auth.set_password("secret").unwrap();
        assert!(auth.require("secret").is_ok());
        assert_eq!(auth.require("nope").unwrap_err().to_string(), "invalid password");
    }
}

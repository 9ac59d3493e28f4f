use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};

const HASH_SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

/// 密码校验接口
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn verify(&self, plaintext: &str, stored: &str) -> bool;

    /// 存储值不是哈希格式，按明文比较
    fn is_legacy_plaintext(&self, stored: &str) -> bool;
}

/// `sha256$<salt hex>$<digest hex>`，digest = SHA-256(salt || password)
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256CredentialStore;

#[async_trait]
impl CredentialStore for Sha256CredentialStore {
    async fn verify(&self, plaintext: &str, stored: &str) -> bool {
        match parse_hash(stored) {
            Some((salt, expected)) => {
                constant_time_eq(&digest(&salt, plaintext), &expected)
            }
            None => constant_time_eq(plaintext.as_bytes(), stored.as_bytes()),
        }
    }

    fn is_legacy_plaintext(&self, stored: &str) -> bool {
        parse_hash(stored).is_none()
    }
}

pub fn hash_password(plaintext: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    format!(
        "{}${}${}",
        HASH_SCHEME,
        hex::encode(salt),
        hex::encode(digest(&salt, plaintext))
    )
}

fn parse_hash(stored: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut parts = stored.split('$');
    if parts.next()? != HASH_SCHEME {
        return None;
    }
    let salt = hex::decode(parts.next()?).ok()?;
    let expected = hex::decode(parts.next()?).ok()?;
    if parts.next().is_some() || salt.is_empty() || expected.len() != 32 {
        return None;
    }
    Some((salt, expected))
}

fn digest(salt: &[u8], plaintext: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(plaintext.as_bytes());
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_password_round_trip() {
        let store = Sha256CredentialStore;
        let stored = hash_password("hunter2");

        assert!(stored.starts_with("sha256$"));
        assert!(!store.is_legacy_plaintext(&stored));
        assert!(store.verify("hunter2", &stored).await);
        assert!(!store.verify("hunter3", &stored).await);
        assert!(!store.verify("", &stored).await);
    }

    #[tokio::test]
    async fn salts_differ_between_hashes() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[tokio::test]
    async fn legacy_plaintext_is_compared_directly() {
        let store = Sha256CredentialStore;
        assert!(store.is_legacy_plaintext("admin123"));
        assert!(store.verify("admin123", "admin123").await);
        assert!(!store.verify("admin12", "admin123").await);
    }

    #[test]
    fn malformed_hash_counts_as_plaintext() {
        let store = Sha256CredentialStore;
        assert!(store.is_legacy_plaintext("sha256$zz$00"));
        assert!(store.is_legacy_plaintext("sha256$00"));
        assert!(store.is_legacy_plaintext(&format!("sha256$00${}", "ab".repeat(31))));
    }
}

use rand::RngCore;
use sha2::{Digest, Sha256};

pub const DEFAULT_HASH_ROUNDS: u32 = 10_000;
const SALT_LEN: usize = 16;
const SCHEME: &str = "sha256";

/// One-way credential hashing for new guardian accounts.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> String;
    fn verify(&self, password: &str, encoded: &str) -> bool;
}

/// Salted, iterated SHA-256 encoded as `sha256$<rounds>$<salt hex>$<digest hex>`.
#[derive(Debug, Clone)]
pub struct SaltedSha256Hasher {
    rounds: u32,
}

impl Default for SaltedSha256Hasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_ROUNDS)
    }
}

impl SaltedSha256Hasher {
    pub fn new(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(1),
        }
    }

    fn digest(password: &str, salt: &[u8], rounds: u32) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        let mut digest: [u8; 32] = hasher.finalize().into();
        for _ in 1..rounds {
            let mut hasher = Sha256::new();
            hasher.update(salt);
            hasher.update(digest);
            digest = hasher.finalize().into();
        }
        digest
    }
}

impl PasswordHasher for SaltedSha256Hasher {
    fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = Self::digest(password, &salt, self.rounds);
        format!(
            "{SCHEME}${}${}${}",
            self.rounds,
            hex::encode(salt),
            hex::encode(digest)
        )
    }

    fn verify(&self, password: &str, encoded: &str) -> bool {
        let mut parts = encoded.split('$');
        let (Some(SCHEME), Some(rounds), Some(salt), Some(expected), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return false;
        };
        let (Ok(rounds), Ok(salt), Ok(expected)) =
            (rounds.parse::<u32>(), hex::decode(salt), hex::decode(expected))
        else {
            return false;
        };
        if rounds == 0 {
            return false;
        }

        let actual = Self::digest(password, &salt, rounds);
        // Constant-time comparison.
        expected.len() == actual.len()
            && expected
                .iter()
                .zip(actual.iter())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::Rng;

use crate::errors::ApiError;

/// Leading tag shared by every credential.
pub const KEY_SCHEME: &str = "sk";

/// Length of the random slice that goes into the lookup prefix.
pub const PREFIX_RANDOM_LEN: usize = 8;

/// 160 bits of randomness, 32 base32 characters.
const RANDOM_BYTES: usize = 20;

const BASE32: base32::Alphabet = base32::Alphabet::RFC4648 { padding: false };

/// Result of generating a new credential. `plaintext` is handed to the caller
/// once and must never be persisted.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub plaintext: String,
    pub prefix: String,
    pub digest: String,
}

/// Stateless credential scheme: `sk_<env>_<8 chars>_<24 chars>`.
#[derive(Clone)]
pub struct KeyCodec {
    pub environment: String,
    params: Params,
}

impl KeyCodec {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            params: Params::default(),
        }
    }

    pub fn live() -> Self {
        Self::new("live")
    }

    pub fn test() -> Self {
        Self::new("test")
    }

    /// Override the Argon2 cost used for new digests. Existing digests carry
    /// their own parameters, so verification is unaffected.
    pub fn with_cost(mut self, memory_kib: u32, iterations: u32) -> Result<Self, ApiError> {
        self.params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| ApiError::Config(format!("invalid argon2 cost: {}", e)))?;
        Ok(self)
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn generate(&self) -> Result<GeneratedKey, ApiError> {
        let mut random_bytes = [0u8; RANDOM_BYTES];
        rand::thread_rng().fill(&mut random_bytes);
        let random = base32::encode(BASE32, &random_bytes);

        let (lookup, secret) = random.split_at(PREFIX_RANDOM_LEN);
        let prefix = format!("{}_{}_{}", KEY_SCHEME, self.environment, lookup);
        let plaintext = format!("{}_{}", prefix, secret);
        let digest = self.digest(&plaintext)?;

        Ok(GeneratedKey {
            plaintext,
            prefix,
            digest,
        })
    }

    /// Salted Argon2id digest in PHC string form.
    pub fn digest(&self, plaintext: &str) -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self.hasher().hash_password(plaintext.as_bytes(), &salt)?;
        Ok(hash.to_string())
    }

    /// Constant-time check of a presented credential against a stored digest.
    pub fn verify(&self, candidate: &str, digest: &str) -> bool {
        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };

        Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok()
    }

    /// Lookup prefix of a presented credential: the first two segments plus the
    /// first eight characters of the third.
    pub fn extract_prefix(candidate: &str) -> Result<String, ApiError> {
        let parts: Vec<&str> = candidate.split('_').collect();
        if parts.len() < 3 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(ApiError::MalformedKey);
        }

        let lookup = parts[2]
            .get(..PREFIX_RANDOM_LEN)
            .ok_or(ApiError::MalformedKey)?;

        Ok(format!("{}_{}_{}", parts[0], parts[1], lookup))
    }

    /// Redacted display form, e.g. `sk_live_AB12...CD34`. Cosmetic only.
    pub fn mask(plaintext: &str) -> String {
        let parts: Vec<&str> = plaintext.split('_').collect();
        if parts.len() < 3 {
            return "***".to_string();
        }

        let chars: Vec<char> = parts[2].chars().collect();
        let head: String = chars.iter().take(4).collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();

        format!("{}_{}_{}...{}", parts[0], parts[1], head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KeyCodec {
        KeyCodec::test().with_cost(8, 1).unwrap()
    }

    #[test]
    fn test_generated_key_layout() {
        let key = cheap().generate().unwrap();

        let parts: Vec<&str> = key.plaintext.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "sk");
        assert_eq!(parts[1], "test");
        assert_eq!(parts[2].len(), PREFIX_RANDOM_LEN);
        assert_eq!(parts[3].len(), 24);
        assert_eq!(key.prefix, format!("sk_test_{}", parts[2]));
        assert!(key.plaintext.starts_with(&key.prefix));
        assert!(key.digest.starts_with("$argon2id$"));
        assert!(!key.digest.contains(&key.plaintext));
    }

    #[test]
    fn test_extract_prefix() {
        assert_eq!(
            KeyCodec::extract_prefix("sk_test_ABCDEFGH_rest").unwrap(),
            "sk_test_ABCDEFGH"
        );
        assert_eq!(
            KeyCodec::extract_prefix("sk_live_ABCDEFGHIJKL").unwrap(),
            "sk_live_ABCDEFGH"
        );
        assert!(matches!(
            KeyCodec::extract_prefix("sk_test"),
            Err(ApiError::MalformedKey)
        ));
        assert!(matches!(
            KeyCodec::extract_prefix("sk_test_ABC"),
            Err(ApiError::MalformedKey)
        ));
        assert!(matches!(
            KeyCodec::extract_prefix("__ABCDEFGH"),
            Err(ApiError::MalformedKey)
        ));
        assert!(matches!(
            KeyCodec::extract_prefix("sk_test_aéééé"),
            Err(ApiError::MalformedKey)
        ));
    }

    #[test]
    fn test_mask() {
        assert_eq!(
            KeyCodec::mask("sk_test_ABCDEFGH_0123456789"),
            "sk_test_ABCD...EFGH"
        );
        assert_eq!(KeyCodec::mask("sk_test"), "***");
        assert_eq!(KeyCodec::mask("sk_test_AB"), "sk_test_AB...AB");
    }

    #[test]
    fn test_verify_rejects_garbage_digest() {
        let codec = cheap();
        assert!(!codec.verify("sk_test_ABCDEFGH_x", "not-a-phc-string"));
        assert!(!codec.verify("sk_test_ABCDEFGH_x", ""));
    }

    #[test]
    fn test_digest_is_salted() {
        let codec = cheap();
        let a = codec.digest("sk_test_ABCDEFGH_secret").unwrap();
        let b = codec.digest("sk_test_ABCDEFGH_secret").unwrap();
        assert_ne!(a, b);
        assert!(codec.verify("sk_test_ABCDEFGH_secret", &a));
        assert!(codec.verify("sk_test_ABCDEFGH_secret", &b));
    }

    #[test]
    fn test_invalid_cost_is_rejected() {
        assert!(matches!(
            KeyCodec::test().with_cost(0, 0),
            Err(ApiError::Config(_))
        ));
    }
}

//! Prompt fingerprints — the response cache key.

use localcoder_core::engine::GenerationParams;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 over (assembled prompt, model id, generation parameters).
///
/// Fields are length-prefixed and hashed in a fixed order, so two requests
/// share a fingerprint only if every input is byte-identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(prompt: &str, model_id: &str, params: &GenerationParams) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"localcoder/fp/1");
        update_field(&mut hasher, prompt.as_bytes());
        update_field(&mut hasher, model_id.as_bytes());
        hasher.update((params.max_tokens as u64).to_le_bytes());
        hasher.update(params.temperature.to_bits().to_le_bytes());
        hasher.update((params.stop_sequences.len() as u64).to_le_bytes());
        for stop in &params.stop_sequences {
            update_field(&mut hasher, stop.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        hex::decode(s).ok()?.try_into().ok().map(Self)
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GenerationParams {
        GenerationParams::default()
    }

    #[test]
    fn deterministic() {
        let a = Fingerprint::compute("prompt", "model", &params());
        let b = Fingerprint::compute("prompt", "model", &params());
        assert_eq!(a, b);
    }

    #[test]
    fn every_input_matters() {
        let base = Fingerprint::compute("prompt", "model", &params());
        assert_ne!(base, Fingerprint::compute("prompt!", "model", &params()));
        assert_ne!(base, Fingerprint::compute("prompt", "other", &params()));

        let mut p = params();
        p.temperature = 0.2;
        assert_ne!(base, Fingerprint::compute("prompt", "model", &p));

        let mut p = params();
        p.max_tokens = 1024;
        assert_ne!(base, Fingerprint::compute("prompt", "model", &p));

        let mut p = params();
        p.stop_sequences.push("```\n\n".into());
        assert_ne!(base, Fingerprint::compute("prompt", "model", &p));
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = Fingerprint::compute("ab", "c", &params());
        let b = Fingerprint::compute("a", "bc", &params());
        assert_ne!(a, b);
    }

    #[test]
    fn hex_roundtrip() {
        let fp = Fingerprint::compute("x", "y", &params());
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(Fingerprint::from_hex(&hex), Some(fp));
    }

    #[test]
    fn bad_hex_rejected() {
        assert!(Fingerprint::from_hex("abc").is_none());
        assert!(Fingerprint::from_hex(&"zz".repeat(32)).is_none());
        assert!(Fingerprint::from_hex(&"ab".repeat(33)).is_none());
    }

    #[test]
    fn signed_hex_pairs_rejected() {
        assert!(Fingerprint::from_hex(&"+f".repeat(32)).is_none());
    }
}

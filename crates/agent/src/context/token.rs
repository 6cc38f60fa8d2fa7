//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token by default.
//! Small code models use BPE tokenizers for which this stays within ~10% on
//! English text and source code, which is close enough for budgeting.

/// Characters per token when nothing else is configured.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Pure, stateless text → token count estimator.
///
/// `estimate` is monotonic in the input length and subadditive
/// (`estimate(a + b) <= estimate(a) + estimate(b)`), so the sum of the
/// estimates of rendered prompt pieces bounds the estimate of the whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    chars_per_token: usize,
}

impl TokenEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }

    /// Estimate the token count for a string. Rounds up.
    pub fn estimate(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token)
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(TokenEstimator::default().estimate(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(TokenEstimator::default().estimate("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(TokenEstimator::default().estimate("hello"), 2);
    }

    #[test]
    fn custom_ratio() {
        let est = TokenEstimator::new(3);
        assert_eq!(est.estimate(&"a".repeat(100)), 34);
    }

    #[test]
    fn zero_ratio_is_clamped() {
        assert_eq!(TokenEstimator::new(0).chars_per_token(), 1);
    }

    #[test]
    fn monotonic_and_subadditive() {
        let est = TokenEstimator::default();
        let pieces = ["fn main() {", " println!(\"hi\"); ", "}", "", "// trailing comment\n"];
        for a in pieces {
            for b in pieces {
                let joined = format!("{a}{b}");
                assert!(est.estimate(&joined) >= est.estimate(a));
                assert!(est.estimate(&joined) <= est.estimate(a) + est.estimate(b));
            }
        }
    }
}

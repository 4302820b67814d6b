use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;

use crate::core::{BatchError, Value};

/// Opaque random version token used for optimistic concurrency.
///
/// Stored as a decimal string so that it survives any numeric column width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionToken(u64);

impl VersionToken {
    pub const MAX: u64 = 9_223_372_036_854_775_806;

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Reads a token out of an attribute value, `None` for NULL or non-numeric content.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) if *i >= 0 => Some(Self(*i as u64)),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionToken {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|err| BatchError::TypeMismatch(format!("invalid version token '{}': {}", s, err)))
    }
}

impl From<VersionToken> for Value {
    fn from(token: VersionToken) -> Self {
        Value::Text(token.to_string())
    }
}

pub struct VersionTokenGenerator {
    rng: StdRng,
}

impl Default for VersionTokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VersionTokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionTokenGenerator").finish_non_exhaustive()
    }
}

impl VersionTokenGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next(&mut self) -> VersionToken {
        VersionToken(self.rng.gen_range(0..=VersionToken::MAX))
    }

    /// A token guaranteed to differ from `current`.
    pub fn next_after(&mut self, current: Option<VersionToken>) -> VersionToken {
        loop {
            let token = self.next();
            if Some(token) != current {
                return token;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_stay_in_range() {
        let mut generator = VersionTokenGenerator::seeded(7);
        for _ in 0..1000 {
            assert!(generator.next().get() <= VersionToken::MAX);
        }
    }

    #[test]
    fn test_next_after_never_repeats_current() {
        let mut generator = VersionTokenGenerator::seeded(42);
        let first = generator.next();
        let second = generator.next_after(Some(first));
        assert_ne!(first, second);
    }

    #[test]
    fn test_token_value_round_trip() {
        let token = VersionToken::new(200);
        let value = Value::from(token);
        assert_eq!(value, Value::Text("200".into()));
        assert_eq!(VersionToken::from_value(&value), Some(token));
        assert_eq!(VersionToken::from_value(&Value::Null), None);
        assert!("12x".parse::<VersionToken>().is_err());
    }
}

//! Hierarchical configuration tree.
//!
//! The loader that fills the tree from files lives outside the core; the
//! core only consumes dotted keys (`strategy.funding_arbitrage.top_n_instruments`)
//! with typed getters and per-key defaults. `sub` scopes the tree to a
//! prefix so each component reads its own block.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while reading configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key is absent.
    #[error("missing configuration key '{0}'")]
    MissingKey(String),

    /// A key is present but its value does not parse as the requested type.
    #[error("malformed configuration value for '{key}': '{value}'")]
    Malformed {
        /// Full dotted key.
        key: String,
        /// Raw value found in the tree.
        value: String,
    },
}

/// A read-only view over a flat dotted-key -> value map.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    prefix: String,
    values: BTreeMap<String, String>,
}

impl ConfigTree {
    /// Build a tree from raw key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: String::new(),
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Scope the tree to `prefix`; subsequent lookups prepend it.
    pub fn sub(&self, prefix: &str) -> Self {
        Self {
            prefix: self.full_key(prefix),
            values: self.values.clone(),
        }
    }

    /// Raw string lookup with default.
    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or(default).to_string()
    }

    /// Required string lookup.
    pub fn require_str(&self, key: &str) -> Result<String, ConfigError> {
        self.raw(key)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::MissingKey(self.full_key(key)))
    }

    /// Integer lookup with default.
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.parse(key).unwrap_or(default)
    }

    /// Unsigned integer lookup with default.
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.parse(key).unwrap_or(default)
    }

    /// Decimal lookup with default.
    pub fn get_decimal(&self, key: &str, default: Decimal) -> Decimal {
        self.parse(key).unwrap_or(default)
    }

    /// Boolean lookup with default. Accepts true/false/1/0.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            _ => default,
        }
    }

    /// Required decimal lookup, failing on absence or parse error.
    pub fn require_decimal(&self, key: &str) -> Result<Decimal, ConfigError> {
        let raw = self.require_str(key)?;
        raw.parse().map_err(|_| ConfigError::Malformed {
            key: self.full_key(key),
            value: raw,
        })
    }

    /// Whether any key exists under `prefix`.
    pub fn has_section(&self, prefix: &str) -> bool {
        let full = format!("{}.", self.full_key(prefix));
        self.values.range(full.clone()..).next().is_some_and(|(k, _)| k.starts_with(&full))
    }

    fn raw(&self, key: &str) -> Option<&str> {
        self.values.get(&self.full_key(key)).map(String::as_str)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.raw(key).and_then(|v| v.parse().ok())
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tree() -> ConfigTree {
        ConfigTree::from_pairs([
            ("strategy.funding_arbitrage.top_n_instruments", "3"),
            ("strategy.funding_arbitrage.position_size_usd", "1000"),
            ("strategy.funding_arbitrage.use_twap", "true"),
            ("api.binance.api_key", "key"),
            ("risk.limits.max_drawdown", "0.1"),
        ])
    }

    #[test]
    fn test_typed_getters_with_defaults() {
        let t = tree();
        assert_eq!(t.get_i64("strategy.funding_arbitrage.top_n_instruments", 5), 3);
        assert_eq!(t.get_i64("strategy.funding_arbitrage.missing", 5), 5);
        assert!(t.get_bool("strategy.funding_arbitrage.use_twap", false));
        assert_eq!(
            t.get_decimal("strategy.funding_arbitrage.position_size_usd", dec!(0)),
            dec!(1000)
        );
    }

    #[test]
    fn test_sub_scoping() {
        let t = tree().sub("strategy.funding_arbitrage");
        assert_eq!(t.get_i64("top_n_instruments", 5), 3);
        assert_eq!(t.get_decimal("position_size_usd", dec!(0)), dec!(1000));
    }

    #[test]
    fn test_require_missing_key() {
        let t = tree();
        let err = t.require_str("api.binance.api_secret").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(k) if k == "api.binance.api_secret"));
    }

    #[test]
    fn test_require_malformed_value() {
        let t = ConfigTree::from_pairs([("risk.limits.max_drawdown", "lots")]);
        let err = t.require_decimal("risk.limits.max_drawdown").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn test_has_section() {
        let t = tree();
        assert!(t.has_section("risk"));
        assert!(t.has_section("risk.limits"));
        assert!(!t.has_section("monitor"));
    }
}

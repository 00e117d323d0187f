//! Environment variable utilities
//!
//! Typed lookups used by `MscConfig::from_env()`.
//!
//! # Usage
//!
//! ```ignore
//! use msu_core::env::{env_get, env_get_bool, env_get_opt};
//!
//! let mode: Mode = env_get("MSU_MODE", Mode::Multi);
//! let wrap: bool = env_get_bool("MSU_WRAP", true);
//! let sizes: Option<String> = env_get_opt("MSU_NR_PAGES");
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
///
/// Unset and unparsable values both fall back to `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Any other set value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as optional value
///
/// Returns `Some(T)` if the variable is set and parses successfully,
/// `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__MSU_TEST_UNSET_VAR__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_opt_none() {
        let val: Option<usize> = env_get_opt("__MSU_TEST_UNSET_VAR__");
        assert!(val.is_none());
    }

    #[test]
    fn test_env_get_mode() {
        std::env::set_var("__MSU_TEST_MODE__", "single");
        assert_eq!(env_get("__MSU_TEST_MODE__", Mode::Multi), Mode::Single);

        std::env::set_var("__MSU_TEST_MODE__", "bogus");
        assert_eq!(env_get("__MSU_TEST_MODE__", Mode::Multi), Mode::Multi);
        std::env::remove_var("__MSU_TEST_MODE__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        std::env::set_var("__MSU_TEST_BOOL__", "1");
        assert!(env_get_bool("__MSU_TEST_BOOL__", false));

        std::env::set_var("__MSU_TEST_BOOL__", "On");
        assert!(env_get_bool("__MSU_TEST_BOOL__", false));

        std::env::set_var("__MSU_TEST_BOOL__", "0");
        assert!(!env_get_bool("__MSU_TEST_BOOL__", true));

        std::env::set_var("__MSU_TEST_BOOL__", "garbage");
        assert!(!env_get_bool("__MSU_TEST_BOOL__", true));

        std::env::remove_var("__MSU_TEST_BOOL__");
        assert!(env_get_bool("__MSU_TEST_BOOL__", true));
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__MSU_TEST_INVALID__", "not_a_number");
        let val: usize = env_get("__MSU_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__MSU_TEST_INVALID__");
    }
}

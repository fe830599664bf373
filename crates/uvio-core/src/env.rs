//! Environment variable utilities
//!
//! Lookups go through an [`EnvSource`] so configuration code can be tested
//! against a plain map instead of the process environment.
//!
//! ```ignore
//! use uvio_core::env::{env_get, ProcessEnv};
//!
//! let workers: usize = env_get(&ProcessEnv, "UVIO_THREADPOOL_SIZE", 4);
//! ```

use std::collections::HashMap;
use std::str::FromStr;

/// Where variables are read from
pub trait EnvSource {
    /// Raw value of `key`, if set and valid unicode
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvSource for [(&str, &str)] {
    fn var(&self, key: &str) -> Option<String> {
        self.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    }
}

/// Variable parsed as `T`, or `default` when unset or unparsable
#[inline]
pub fn env_get<T, E>(env: &E, key: &str, default: T) -> T
where
    T: FromStr,
    E: EnvSource + ?Sized,
{
    env_get_opt(env, key).unwrap_or(default)
}

/// Variable parsed as `T`, `None` when unset or unparsable
#[inline]
pub fn env_get_opt<T, E>(env: &E, key: &str) -> Option<T>
where
    T: FromStr,
    E: EnvSource + ?Sized,
{
    env.var(key).and_then(|v| v.trim().parse().ok())
}

/// Boolean variable: "1", "true", "yes", "on" (any case) are true,
/// "0", "false", "no", "off" are false, anything else yields `default`.
#[inline]
pub fn env_get_bool<E>(env: &E, key: &str, default: bool) -> bool
where
    E: EnvSource + ?Sized,
{
    match env.var(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_parses() {
        let env: &[(&str, &str)] = &[("N", "12"), ("BAD", "twelve")];
        assert_eq!(env_get(env, "N", 4usize), 12);
        assert_eq!(env_get(env, "BAD", 4usize), 4);
        assert_eq!(env_get(env, "MISSING", 4usize), 4);
    }

    #[test]
    fn test_env_get_opt() {
        let env: &[(&str, &str)] = &[("PORT", " 8080 ")];
        assert_eq!(env_get_opt::<u16, _>(env, "PORT"), Some(8080));
        assert_eq!(env_get_opt::<u16, _>(env, "NOPE"), None);
    }

    #[test]
    fn test_env_get_bool() {
        let env: &[(&str, &str)] = &[("A", "YES"), ("B", "off"), ("C", "maybe")];
        assert!(env_get_bool(env, "A", false));
        assert!(!env_get_bool(env, "B", true));
        assert!(env_get_bool(env, "C", true));
        assert!(!env_get_bool(env, "D", false));
    }

    #[test]
    fn test_hashmap_source() {
        let mut map = HashMap::new();
        map.insert("K".to_string(), "3".to_string());
        assert_eq!(env_get(&map, "K", 0u32), 3);
    }
}

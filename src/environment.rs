use std::env;
use std::str::FromStr;
use tracing::warn;

/// Reads and parses an environment variable, falling back to `default` when it is
/// unset. A value that fails to parse is logged and replaced by the default.
pub fn get_env_parsed<T>(var: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid value '{}' for {}, using default {}", raw, var, default);
                default
            }
        },
        _ => default,
    }
}

/// Reads a boolean environment variable. Accepts `1/0`, `true/false`, `yes/no`.
pub fn get_env_bool(var: &str, default: bool) -> bool {
    match env::var(var) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            "" => default,
            other => {
                warn!("Invalid boolean '{}' for {}, using default {}", other, var, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// Reads an optional string variable; blank values count as unset.
pub fn get_env_opt(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

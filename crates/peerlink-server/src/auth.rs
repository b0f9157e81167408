//! Relay secret loading and comparison.

/// `.env` / environment key holding the shared relay secret.
pub const RELAY_PASSWORD_ENV: &str = "RELAY_PASSWORD";

/// Load the relay secret from a `.env` file in the working directory or
/// the process environment. An unset or empty value disables relay
/// authentication entirely.
pub fn load_relay_secret() -> Option<String> {
    dotenv::dotenv().ok();
    std::env::var(RELAY_PASSWORD_ENV)
        .ok()
        .filter(|s| !s.is_empty())
}

/// Compare two byte strings without short-circuiting on the first
/// mismatching byte. The length check still leaks length, which is fine
/// for a shared transit secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

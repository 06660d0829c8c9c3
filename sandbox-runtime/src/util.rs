use chrono::Utc;
use once_cell::sync::OnceCell;
use reqwest::Client;

use crate::error::{Result, SandboxError};

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

/// Current epoch seconds, clamped to non-negative.
pub fn now_ts() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Shared HTTP client used by the worker client, reaper and model proxy.
/// Timeout is taken from [`crate::config::RuntimeConfig`] on first use
/// and reused for every subsequent call.
pub fn http_client() -> Result<&'static Client> {
    HTTP_CLIENT
        .get_or_try_init(|| {
            let config = crate::config::RuntimeConfig::load();
            Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|err| SandboxError::Internal(format!("failed to build http client: {err}")))
        })
        .map_err(|err| SandboxError::Internal(err.to_string()))
}

/// Single-quote a shell argument, escaping embedded quotes.
pub fn shell_escape(value: &str) -> String {
    let escaped = value.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}

/// Parse a human-readable memory size (`"8g"`, `"512m"`, `"0"`) into bytes.
pub fn parse_memory_bytes(value: &str) -> Result<u64> {
    let trimmed = value.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return Err(SandboxError::BadRequest("memory must not be empty".into()));
    }

    let (digits, multiplier): (&str, u64) = if let Some(n) = trimmed.strip_suffix('g') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix('k') {
        (n, 1024)
    } else {
        (trimmed.as_str(), 1)
    };

    let value: f64 = digits
        .parse()
        .map_err(|_| SandboxError::BadRequest(format!("unparsable memory string: {trimmed}")))?;

    if value < 0.0 {
        return Err(SandboxError::BadRequest(format!("memory must be non-negative: {trimmed}")));
    }

    Ok((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_suffixes() {
        assert_eq!(parse_memory_bytes("8g").unwrap(), 8 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_bytes("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_bytes("0").unwrap(), 0);
    }

    #[test]
    fn rejects_garbage_memory() {
        assert!(parse_memory_bytes("lots").is_err());
        assert!(parse_memory_bytes("").is_err());
    }

    #[test]
    fn shell_escape_handles_quotes() {
        assert_eq!(shell_escape("it's"), "'it'\"'\"'s'");
    }
}

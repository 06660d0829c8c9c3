//! Startup configuration for the model service proxy (component J), loaded
//! from CLI flags with an optional JSON rules file, mirroring the teacher's
//! env-var-driven `RuntimeConfig::load()` but for a standalone binary whose
//! original Python counterpart (`rock/sdk/model/server/main.py`) is
//! `argparse`-driven instead.

use std::time::Duration;

use serde::Deserialize;

/// One `(substring-of-model, url)` routing rule, matched in order against
/// the request body's `model` field (§4.J step 1).
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRule {
    pub model_substring: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ProxyRulesFile {
    #[serde(default)]
    rules: Vec<ProxyRule>,
    #[serde(default)]
    default: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Ordered routing rules, tried before `default_url`.
    pub rules: Vec<ProxyRule>,
    /// Upstream used when no rule's `model_substring` matches.
    pub default_url: Option<String>,
    /// Base URL for the `GET /v1/*` passthrough; derived from `default_url`
    /// if not given explicitly.
    pub base_url: Option<String>,
    pub retryable_status_codes: Vec<u16>,
    pub request_timeout: Duration,
    pub max_attempts: u32,
}

impl ProxyConfig {
    /// Resolve the upstream URL for `model`, applying `rules` in order and
    /// falling back to `default_url` (§4.J step 1).
    pub fn resolve_upstream(&self, model: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| model.contains(rule.model_substring.as_str()))
            .map(|rule| rule.url.as_str())
            .or(self.default_url.as_deref())
    }

    pub fn load_rules_file(path: &str) -> Result<(Vec<ProxyRule>, Option<String>), String> {
        let raw = std::fs::read_to_string(path).map_err(|err| format!("failed to read {path}: {err}"))?;
        let parsed: ProxyRulesFile = serde_json::from_str(&raw).map_err(|err| format!("invalid proxy rules file {path}: {err}"))?;
        Ok((parsed.rules, parsed.default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rules: Vec<ProxyRule>, default_url: Option<String>) -> ProxyConfig {
        ProxyConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            rules,
            default_url,
            base_url: None,
            retryable_status_codes: vec![429],
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }

    #[test]
    fn matches_first_rule_containing_substring() {
        let config = config(
            vec![
                ProxyRule { model_substring: "gpt-4".into(), url: "https://a".into() },
                ProxyRule { model_substring: "gpt".into(), url: "https://b".into() },
            ],
            Some("https://default".into()),
        );
        assert_eq!(config.resolve_upstream("gpt-4-turbo"), Some("https://a"));
        assert_eq!(config.resolve_upstream("gpt-3.5"), Some("https://b"));
    }

    #[test]
    fn falls_back_to_default_when_no_rule_matches() {
        let config = config(vec![ProxyRule { model_substring: "claude".into(), url: "https://a".into() }], Some("https://default".into()));
        assert_eq!(config.resolve_upstream("gpt-4"), Some("https://default"));
    }

    #[test]
    fn no_match_no_default_is_none() {
        let config = config(vec![], None);
        assert_eq!(config.resolve_upstream("gpt-4"), None);
    }
}

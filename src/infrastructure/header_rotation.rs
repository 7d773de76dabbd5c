use rand::seq::SliceRandom;
use std::collections::HashMap;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7",
    "en-US,en;q=0.9",
    "pt-BR,pt;q=0.8,en;q=0.5",
    "es-ES,es;q=0.9,pt;q=0.7,en;q=0.6",
];

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_USER_AGENT: &str = concat!("pricewatch/", env!("CARGO_PKG_VERSION"));

/// Shapes outbound request headers. With rotation on, each call picks a
/// random browser profile; with it off, a fixed identifying set is sent.
#[derive(Debug, Clone)]
pub struct HeaderRotationPolicy {
    enabled: bool,
    user_agents: Vec<String>,
    accept_languages: Vec<String>,
}

impl HeaderRotationPolicy {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            user_agents: USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            accept_languages: ACCEPT_LANGUAGES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the profile pool. Empty lists fall back to the built-in pool.
    pub fn with_pool(mut self, user_agents: Vec<String>, accept_languages: Vec<String>) -> Self {
        if !user_agents.is_empty() {
            self.user_agents = user_agents;
        }
        if !accept_languages.is_empty() {
            self.accept_languages = accept_languages;
        }
        self
    }

    /// Headers for the next outbound request
    pub fn next_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Accept".to_string(), ACCEPT.to_string());

        if !self.enabled {
            headers.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());
            return headers;
        }

        let mut rng = rand::thread_rng();
        let user_agent = self
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let language = self
            .accept_languages
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| "en-US,en;q=0.9".to_string());

        headers.insert("User-Agent".to_string(), user_agent);
        headers.insert("Accept-Language".to_string(), language);
        headers.insert("Cache-Control".to_string(), "no-cache".to_string());
        if rand::random::<bool>() {
            headers.insert("DNT".to_string(), "1".to_string());
        }
        headers
    }
}

impl Default for HeaderRotationPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_policy_is_stable() {
        let policy = HeaderRotationPolicy::new(false);
        let a = policy.next_headers();
        let b = policy.next_headers();
        assert_eq!(a, b);
        assert!(a["User-Agent"].starts_with("pricewatch/"));
        assert!(!a.contains_key("Accept-Language"));
    }

    #[test]
    fn test_rotation_draws_from_pool() {
        let policy = HeaderRotationPolicy::new(true);
        for _ in 0..20 {
            let headers = policy.next_headers();
            assert!(USER_AGENTS.contains(&headers["User-Agent"].as_str()));
            assert!(ACCEPT_LANGUAGES.contains(&headers["Accept-Language"].as_str()));
        }
    }

    #[test]
    fn test_custom_pool() {
        let policy = HeaderRotationPolicy::new(true)
            .with_pool(vec!["agent-x".to_string()], vec![]);
        let headers = policy.next_headers();
        assert_eq!(headers["User-Agent"], "agent-x");
        assert!(ACCEPT_LANGUAGES.contains(&headers["Accept-Language"].as_str()));
    }
}

//! Process-wide request budgets per client address.
//!
//! Every scope keeps a sliding-window log of request timestamps per client.
//! A request is checked against every rule that applies to it under one lock
//! acquisition and recorded only when all of them pass.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateScope {
    /// Applies to every route.
    Global,
    Info,
    Download,
}

impl RateScope {
    pub fn for_path(path: &str) -> Self {
        match path {
            "/info" => Self::Info,
            "/download" => Self::Download,
            _ => Self::Global,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub scope: RateScope,
    pub limit: usize,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(scope: RateScope, limit: usize, window: Duration) -> Self {
        Self {
            scope,
            limit,
            window,
        }
    }
}

pub fn default_rules() -> Vec<RateLimitRule> {
    vec![
        RateLimitRule::new(RateScope::Global, 200, Duration::days(1)),
        RateLimitRule::new(RateScope::Global, 50, Duration::hours(1)),
        RateLimitRule::new(RateScope::Info, 30, Duration::minutes(1)),
        RateLimitRule::new(RateScope::Download, 10, Duration::minutes(1)),
    ]
}

type RateLimitMap = HashMap<(RateScope, String), Vec<DateTime<Utc>>>;

#[derive(Debug)]
pub struct RateLimiter {
    rules: Vec<RateLimitRule>,
    log: Mutex<RateLimitMap>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl RateLimiter {
    pub fn new(rules: Vec<RateLimitRule>) -> Self {
        Self {
            rules,
            log: Mutex::new(HashMap::new()),
        }
    }

    /// Records one request, or returns the seconds to wait before retrying.
    pub async fn check(&self, client: &str, scope: RateScope) -> Result<(), u64> {
        self.check_at(client, scope, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        client: &str,
        scope: RateScope,
        now: DateTime<Utc>,
    ) -> Result<(), u64> {
        let applicable: Vec<&RateLimitRule> = self
            .rules
            .iter()
            .filter(|rule| rule.scope == RateScope::Global || rule.scope == scope)
            .collect();
        let mut scopes: Vec<RateScope> = Vec::new();
        for rule in &applicable {
            if !scopes.contains(&rule.scope) {
                scopes.push(rule.scope);
            }
        }

        let mut log = self.log.lock().await;
        log.retain(|(rule_scope, _), entries| {
            let window_start = now - self.longest_window(*rule_scope);
            entries.retain(|timestamp| *timestamp > window_start);
            !entries.is_empty()
        });

        let mut retry_after_seconds: Option<u64> = None;
        for rule in &applicable {
            let window_start = now - rule.window;
            let in_window: Vec<&DateTime<Utc>> = log
                .get(&(rule.scope, client.to_string()))
                .map(|entries| entries.iter().filter(|t| **t > window_start).collect())
                .unwrap_or_default();

            if in_window.len() >= rule.limit {
                let reset_at = in_window
                    .iter()
                    .min()
                    .map(|oldest| **oldest + rule.window)
                    .unwrap_or(now + rule.window);
                let wait = (reset_at - now).num_seconds().max(1) as u64;
                retry_after_seconds =
                    Some(retry_after_seconds.map_or(wait, |current| current.max(wait)));
            }
        }

        if let Some(seconds) = retry_after_seconds {
            debug!("rate limit hit for {client} on {scope:?}, retry in {seconds}s");
            return Err(seconds);
        }

        for rule_scope in scopes {
            log.entry((rule_scope, client.to_string())).or_default().push(now);
        }

        Ok(())
    }

    fn longest_window(&self, scope: RateScope) -> Duration {
        self.rules
            .iter()
            .filter(|rule| rule.scope == scope)
            .map(|rule| rule.window)
            .max()
            .unwrap_or_else(Duration::zero)
    }
}

//! Alternative names after a conflict, and the caller-side retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::LABEL_MAX;

/// Returns the next alternative for a service instance name.
///
/// `"Test Service"` becomes `"Test Service #2"`, which becomes
/// `"Test Service #3"`, and so on.
pub fn alternative_service_name(name: &str) -> String {
    next_alternative(name, " #")
}

/// Returns the next alternative for a host name label.
///
/// `"foo"` becomes `"foo-2"`, which becomes `"foo-3"`, and so on.
pub fn alternative_host_name(name: &str) -> String {
    next_alternative(name, "-")
}

fn next_alternative(name: &str, separator: &str) -> String {
    let (base, next) = match split_suffix(name, separator) {
        Some((base, n)) => match n.checked_add(1) {
            Some(next) => (base, next),
            None => (name, 2),
        },
        None => (name, 2),
    };

    let suffix = format!("{separator}{next}");
    let room = LABEL_MAX.saturating_sub(suffix.len());
    format!("{}{suffix}", truncate_on_char_boundary(base, room))
}

/// Splits `"<base><separator><digits>"`, requiring a non-empty base.
fn split_suffix<'a>(name: &'a str, separator: &str) -> Option<(&'a str, u64)> {
    let pos = name.rfind(separator)?;
    let digits = &name[pos + separator.len()..];
    if pos == 0 || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    let n = digits.parse().ok()?;
    Some((&name[..pos], n))
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// How a caller reacts to repeated collisions.
///
/// The core never retries on its own; listeners consult this to decide
/// whether to pick an alternative name and how long to wait first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after a collision; `None` is unbounded.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Delay before the first retry, in milliseconds.
    #[serde(default)]
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Multiplier applied for each further attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: 0,
            max_backoff_ms: default_max_backoff_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after `max_attempts` retries, without delay.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::default()
        }
    }

    /// Returns the delay before retry number `attempt` (1-based), or `None`
    /// once the policy is exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let ms = self.initial_backoff_ms as f64 * self.backoff_factor.powi(exp);
        let capped = ms.min(self.max_backoff_ms as f64).max(0.0);
        Some(Duration::from_millis(capped as u64))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn service_name_sequence() {
        assert_eq!(alternative_service_name("Test Service"), "Test Service #2");
        assert_eq!(alternative_service_name("Test Service #2"), "Test Service #3");
        assert_eq!(alternative_service_name("Test Service #9"), "Test Service #10");
    }

    #[test]
    fn host_name_sequence() {
        assert_eq!(alternative_host_name("foo"), "foo-2");
        assert_eq!(alternative_host_name("foo-2"), "foo-3");
        assert_eq!(alternative_host_name("foo-bar"), "foo-bar-2");
    }

    #[test]
    fn suffix_lookalikes_get_a_fresh_suffix() {
        assert_eq!(alternative_service_name("#5"), "#5 #2");
        assert_eq!(alternative_host_name("-5"), "-5-2");
        assert_eq!(alternative_host_name("foo-02"), "foo-02-2");
        assert_eq!(alternative_host_name("foo-"), "foo--2");
    }

    #[test]
    fn repeated_alternatives_never_repeat() {
        for start in ["Test Service", "x", "Ünïcödé näme", &"y".repeat(63)] {
            let mut seen = HashSet::new();
            seen.insert(start.to_string());
            let mut name = start.to_string();
            for _ in 0..200 {
                name = alternative_service_name(&name);
                assert!(name.len() <= LABEL_MAX, "{name} too long");
                assert!(seen.insert(name.clone()), "{name} repeated");
            }
        }

        let mut seen = HashSet::new();
        let mut host = "host".to_string();
        for _ in 0..200 {
            host = alternative_host_name(&host);
            assert!(seen.insert(host.clone()));
        }
    }

    #[test]
    fn long_names_are_truncated_on_char_boundaries() {
        let name = "é".repeat(40);
        let alt = alternative_service_name(&name);
        assert!(alt.len() <= LABEL_MAX);
        assert!(alt.ends_with(" #2"));
    }

    #[test]
    fn default_policy_is_unbounded_and_immediate() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::ZERO));
        assert_eq!(policy.delay_for_attempt(1000), Some(Duration::ZERO));
    }

    #[test]
    fn bounded_policy_gives_up() {
        let policy = RetryPolicy::bounded(3);
        assert!(policy.delay_for_attempt(3).is_some());
        assert!(policy.delay_for_attempt(4).is_none());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: None,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(5), Some(Duration::from_millis(1000)));
    }
}

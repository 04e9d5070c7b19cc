//! Rule Module
//!
//! Policy options and their compiled, validated form.

use std::fmt;
use std::sync::Arc;

use chrono::{Local, NaiveTime, TimeZone};

use crate::error::{CacheError, Result};
use crate::policy::Generator;

/// One day in milliseconds
pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Computes the stale threshold from `(stored, ttl)`.
pub type StaleFn = Arc<dyn Fn(u64, u64) -> u64 + Send + Sync>;

// == Stale In ==
/// Age after which a cached entry counts as stale.
#[derive(Clone)]
pub enum StaleIn {
    /// Fixed age in milliseconds
    After(u64),
    /// Age computed per entry from its stored time and ttl
    Computed(StaleFn),
}

impl StaleIn {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(u64, u64) -> u64 + Send + Sync + 'static,
    {
        StaleIn::Computed(Arc::new(f))
    }

    pub fn resolve(&self, stored: u64, ttl: u64) -> u64 {
        match self {
            StaleIn::After(ms) => *ms,
            StaleIn::Computed(f) => f(stored, ttl),
        }
    }
}

impl fmt::Debug for StaleIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleIn::After(ms) => f.debug_tuple("After").field(ms).finish(),
            StaleIn::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// How long callers wait on a generator when nothing is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateTimeout {
    After(u64),
    Disabled,
}

// == Policy Options ==
/// Raw policy configuration, validated by [`Rule::compile`].
#[derive(Clone, Default)]
pub struct PolicyOptions {
    /// Relative expiry in milliseconds
    pub expires_in: Option<u64>,
    /// Daily expiry at a local wall-clock time, `"H:MM"` or `"HH:MM"`
    pub expires_at: Option<String>,
    pub stale_in: Option<StaleIn>,
    pub stale_timeout: Option<u64>,
    pub generate_func: Option<Arc<dyn Generator>>,
    pub generate_timeout: Option<GenerateTimeout>,
    pub generate_on_read_error: Option<bool>,
    pub generate_ignore_write_error: Option<bool>,
    pub drop_on_error: Option<bool>,
    pub pending_generate_timeout: Option<u64>,
}

impl PolicyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expires_in(mut self, ms: u64) -> Self {
        self.expires_in = Some(ms);
        self
    }

    pub fn expires_at(mut self, time: impl Into<String>) -> Self {
        self.expires_at = Some(time.into());
        self
    }

    pub fn stale_in(mut self, stale_in: StaleIn) -> Self {
        self.stale_in = Some(stale_in);
        self
    }

    pub fn stale_timeout(mut self, ms: u64) -> Self {
        self.stale_timeout = Some(ms);
        self
    }

    pub fn generate_func<G: Generator + 'static>(mut self, generator: G) -> Self {
        self.generate_func = Some(Arc::new(generator));
        self
    }

    pub fn generate_timeout(mut self, timeout: GenerateTimeout) -> Self {
        self.generate_timeout = Some(timeout);
        self
    }

    pub fn generate_on_read_error(mut self, enabled: bool) -> Self {
        self.generate_on_read_error = Some(enabled);
        self
    }

    pub fn generate_ignore_write_error(mut self, enabled: bool) -> Self {
        self.generate_ignore_write_error = Some(enabled);
        self
    }

    pub fn drop_on_error(mut self, enabled: bool) -> Self {
        self.drop_on_error = Some(enabled);
        self
    }

    pub fn pending_generate_timeout(mut self, ms: u64) -> Self {
        self.pending_generate_timeout = Some(ms);
        self
    }

    fn is_empty(&self) -> bool {
        self.expires_in.is_none()
            && self.expires_at.is_none()
            && self.stale_in.is_none()
            && self.stale_timeout.is_none()
            && self.generate_func.is_none()
            && self.generate_timeout.is_none()
            && self.generate_on_read_error.is_none()
            && self.generate_ignore_write_error.is_none()
            && self.drop_on_error.is_none()
            && self.pending_generate_timeout.is_none()
    }
}

impl fmt::Debug for PolicyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyOptions")
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("stale_in", &self.stale_in)
            .field("stale_timeout", &self.stale_timeout)
            .field("generate_func", &self.generate_func.is_some())
            .field("generate_timeout", &self.generate_timeout)
            .field("generate_on_read_error", &self.generate_on_read_error)
            .field("generate_ignore_write_error", &self.generate_ignore_write_error)
            .field("drop_on_error", &self.drop_on_error)
            .field("pending_generate_timeout", &self.pending_generate_timeout)
            .finish()
    }
}

// == Expiry ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Nothing is cached
    Never,
    In(u64),
    At(NaiveTime),
}

// == Rule ==
/// Compiled policy configuration.
#[derive(Clone)]
pub struct Rule {
    pub(crate) expiry: Expiry,
    pub(crate) stale_in: Option<StaleIn>,
    pub(crate) stale_timeout: u64,
    pub(crate) generator: Option<Arc<dyn Generator>>,
    pub(crate) generate_timeout: Option<u64>,
    pub(crate) generate_on_read_error: bool,
    pub(crate) generate_ignore_write_error: bool,
    pub(crate) drop_on_error: bool,
    /// 0 disables the pending-generate guard
    pub(crate) pending_generate_timeout: u64,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            expiry: Expiry::Never,
            stale_in: None,
            stale_timeout: 0,
            generator: None,
            generate_timeout: None,
            generate_on_read_error: false,
            generate_ignore_write_error: false,
            drop_on_error: false,
            pending_generate_timeout: 0,
        }
    }
}

fn invalid(reason: &str) -> CacheError {
    CacheError::InvalidPolicy(reason.to_string())
}

fn ensure(condition: bool, reason: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(invalid(reason))
    }
}

/// Parses `H:MM` or `HH:MM` into a 24h clock time.
fn parse_expires_at(value: &str) -> Result<NaiveTime> {
    let bad = || invalid("expiresAt must be a time of day in HH:MM format");
    let (hours, minutes) = value.split_once(':').ok_or_else(bad)?;

    let well_formed = (1..=2).contains(&hours.len())
        && minutes.len() == 2
        && hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit());
    if !well_formed {
        return Err(bad());
    }

    let hours: u32 = hours.parse().map_err(|_| bad())?;
    let minutes: u32 = minutes.parse().map_err(|_| bad())?;
    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(bad)
}

impl Rule {
    // == Compile ==
    /// Validates options and produces a rule.
    ///
    /// `server_side` is true when the policy is backed by a store.
    pub fn compile(options: &PolicyOptions, server_side: bool) -> Result<Self> {
        if options.is_empty() {
            return Ok(Rule::default());
        }

        let has_generator = options.generate_func.is_some();
        let fixed_stale_in = match options.stale_in {
            Some(StaleIn::After(ms)) => Some(ms),
            _ => None,
        };

        ensure(
            !(options.expires_in.is_some() && options.expires_at.is_some()),
            "expiresIn and expiresAt are mutually exclusive",
        )?;
        if let Some(expires_in) = options.expires_in {
            ensure(expires_in >= 1, "expiresIn must be at least 1")?;
        }
        if let Some(stale_in) = fixed_stale_in {
            ensure(
                (1..DAY_MS).contains(&stale_in),
                "staleIn must be between 1 and 86399999",
            )?;
        }
        for (value, name) in [
            (options.stale_timeout, "staleTimeout"),
            (options.pending_generate_timeout, "pendingGenerateTimeout"),
            (
                match options.generate_timeout {
                    Some(GenerateTimeout::After(ms)) => Some(ms),
                    _ => None,
                },
                "generateTimeout",
            ),
        ] {
            if value == Some(0) {
                return Err(CacheError::InvalidPolicy(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        for (present, name) in [
            (options.stale_in.is_some(), "staleIn"),
            (options.generate_on_read_error.is_some(), "generateOnReadError"),
            (
                options.generate_ignore_write_error.is_some(),
                "generateIgnoreWriteError",
            ),
            (options.drop_on_error.is_some(), "dropOnError"),
        ] {
            if present && !has_generator {
                return Err(CacheError::InvalidPolicy(format!(
                    "{name} requires generateFunc"
                )));
            }
        }
        ensure(
            has_generator == options.generate_timeout.is_some(),
            "generateFunc and generateTimeout must be set together",
        )?;
        ensure(
            options.stale_in.is_some() == options.stale_timeout.is_some(),
            "staleIn and staleTimeout must be set together",
        )?;

        if let (Some(expires_in), Some(stale_in)) = (options.expires_in, fixed_stale_in) {
            ensure(stale_in < expires_in, "staleIn must be less than expiresIn")?;
        }
        ensure(
            options.stale_in.is_none() || server_side,
            "Cannot use stale options without server-side caching",
        )?;
        if let (Some(stale_timeout), Some(expires_in)) = (options.stale_timeout, options.expires_in) {
            ensure(
                stale_timeout < expires_in,
                "staleTimeout must be less than expiresIn",
            )?;
            if let Some(stale_in) = fixed_stale_in {
                ensure(
                    stale_timeout < expires_in.saturating_sub(stale_in),
                    "staleTimeout must be less than the delta between expiresIn and staleIn",
                )?;
            }
        }
        if let (Some(stale_timeout), Some(pending)) =
            (options.stale_timeout, options.pending_generate_timeout)
        {
            ensure(
                stale_timeout < pending,
                "pendingGenerateTimeout must be greater than staleTimeout if specified",
            )?;
        }

        let expiry = match (&options.expires_at, options.expires_in) {
            (Some(at), _) => Expiry::At(parse_expires_at(at)?),
            (None, Some(ms)) => Expiry::In(ms),
            (None, None) => Expiry::Never,
        };

        let mut rule = Rule {
            expiry,
            generate_on_read_error: options.generate_on_read_error.unwrap_or(true),
            generate_ignore_write_error: options.generate_ignore_write_error.unwrap_or(true),
            ..Rule::default()
        };

        if let Some(generator) = &options.generate_func {
            rule.generator = Some(Arc::clone(generator));
            rule.generate_timeout = match options.generate_timeout {
                Some(GenerateTimeout::After(ms)) => Some(ms),
                _ => None,
            };
            if options.stale_in.is_some() {
                rule.stale_in = options.stale_in.clone();
                rule.stale_timeout = options.stale_timeout.unwrap_or_default();
            }
            rule.drop_on_error = options.drop_on_error.unwrap_or(true);
            rule.pending_generate_timeout = options.pending_generate_timeout.unwrap_or_default();
        }

        Ok(rule)
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    // == TTL ==
    /// Remaining TTL for an item created at `created` (defaults to `now`).
    pub fn ttl(&self, created: Option<u64>, now: u64) -> u64 {
        let created = created.unwrap_or(now);
        if created > now {
            return 0;
        }
        let age = now - created;

        match self.expiry {
            Expiry::Never => 0,
            Expiry::In(expires_in) => expires_in.saturating_sub(age),
            Expiry::At(at) => {
                if age > DAY_MS {
                    return 0;
                }
                match next_cutoff(at, created) {
                    Some(expires) if now < expires => expires - now,
                    _ => 0,
                }
            }
        }
    }
}

/// First local occurrence of `at` strictly after `created`, in epoch milliseconds.
fn next_cutoff(at: NaiveTime, created: u64) -> Option<u64> {
    let created_local = Local.timestamp_millis_opt(i64::try_from(created).ok()?).single()?;
    let cutoff = created_local.date_naive().and_time(at);
    let cutoff = Local.from_local_datetime(&cutoff).earliest()?;
    let mut expires = u64::try_from(cutoff.timestamp_millis()).ok()?;
    if expires <= created {
        expires += DAY_MS;
    }
    Some(expires)
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("expiry", &self.expiry)
            .field("stale_in", &self.stale_in)
            .field("stale_timeout", &self.stale_timeout)
            .field("generator", &self.generator.is_some())
            .field("generate_timeout", &self.generate_timeout)
            .field("generate_on_read_error", &self.generate_on_read_error)
            .field("generate_ignore_write_error", &self.generate_ignore_write_error)
            .field("drop_on_error", &self.drop_on_error)
            .field("pending_generate_timeout", &self.pending_generate_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Generated, PolicyKey};
    use crate::error::BoxError;
    use serde_json::json;

    async fn noop(_key: PolicyKey) -> std::result::Result<Generated, BoxError> {
        Ok(Generated::new(json!(null)))
    }

    fn with_generator() -> PolicyOptions {
        PolicyOptions::new()
            .generate_func(noop)
            .generate_timeout(GenerateTimeout::Disabled)
    }

    fn reason(result: Result<Rule>) -> String {
        match result {
            Err(CacheError::InvalidPolicy(reason)) => reason,
            other => panic!("expected invalid policy, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_options_never_cache() {
        let rule = Rule::compile(&PolicyOptions::new(), true).unwrap();
        assert_eq!(rule.expiry(), Expiry::Never);
        assert!(!rule.has_generator());
        assert_eq!(rule.ttl(None, 1_000), 0);
    }

    #[test]
    fn test_defaults_with_generator() {
        let rule = Rule::compile(&with_generator().expires_in(1000), true).unwrap();
        assert!(rule.drop_on_error);
        assert!(rule.generate_on_read_error);
        assert!(rule.generate_ignore_write_error);
        assert_eq!(rule.pending_generate_timeout, 0);
        assert_eq!(rule.generate_timeout, None);
    }

    #[test]
    fn test_expires_in_and_at_exclusive() {
        let options = PolicyOptions::new().expires_in(1000).expires_at("10:00");
        assert!(reason(Rule::compile(&options, true)).contains("mutually exclusive"));
    }

    #[test]
    fn test_expires_at_format() {
        for good in ["0:00", "00:00", "9:30", "23:59"] {
            assert!(Rule::compile(&PolicyOptions::new().expires_at(good), true).is_ok());
        }
        for bad in ["", "24:00", "12:60", "123:00", "1:5", "ab:cd", "12-00"] {
            assert!(Rule::compile(&PolicyOptions::new().expires_at(bad), true).is_err());
        }
    }

    #[test]
    fn test_stale_in_must_be_less_than_expires_in() {
        let options = with_generator()
            .expires_in(1000)
            .stale_in(StaleIn::After(1000))
            .stale_timeout(10);
        assert_eq!(
            reason(Rule::compile(&options, true)),
            "staleIn must be less than expiresIn"
        );
    }

    #[test]
    fn test_stale_requires_server_side() {
        let options = with_generator()
            .expires_in(1000)
            .stale_in(StaleIn::After(500))
            .stale_timeout(10);
        assert!(reason(Rule::compile(&options, false)).contains("server-side"));
        assert!(Rule::compile(&options, true).is_ok());
    }

    #[test]
    fn test_stale_timeout_bounds() {
        let options = with_generator()
            .expires_in(1000)
            .stale_in(StaleIn::After(500))
            .stale_timeout(500);
        assert!(reason(Rule::compile(&options, true)).contains("delta"));

        let options = with_generator()
            .expires_in(1000)
            .stale_in(StaleIn::computed(|_, _| 500))
            .stale_timeout(1000);
        assert_eq!(
            reason(Rule::compile(&options, true)),
            "staleTimeout must be less than expiresIn"
        );

        let options = with_generator()
            .expires_in(1000)
            .stale_in(StaleIn::After(500))
            .stale_timeout(100)
            .pending_generate_timeout(100);
        assert!(reason(Rule::compile(&options, true)).contains("pendingGenerateTimeout"));
    }

    #[test]
    fn test_generator_options_require_generator() {
        let options = PolicyOptions::new().expires_in(1000).drop_on_error(false);
        assert_eq!(
            reason(Rule::compile(&options, true)),
            "dropOnError requires generateFunc"
        );

        let options = PolicyOptions::new()
            .expires_in(1000)
            .generate_timeout(GenerateTimeout::After(10));
        assert!(reason(Rule::compile(&options, true)).contains("together"));

        let options = PolicyOptions::new().expires_in(1000).generate_func(noop);
        assert!(reason(Rule::compile(&options, true)).contains("together"));
    }

    #[test]
    fn test_stale_in_and_timeout_together() {
        let options = with_generator().expires_in(1000).stale_in(StaleIn::After(100));
        assert_eq!(
            reason(Rule::compile(&options, true)),
            "staleIn and staleTimeout must be set together"
        );
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let options = with_generator()
            .expires_in(1000)
            .pending_generate_timeout(0);
        assert!(reason(Rule::compile(&options, true)).contains("pendingGenerateTimeout"));
    }

    #[test]
    fn test_ttl_expires_in() {
        let rule = Rule::compile(&PolicyOptions::new().expires_in(1000), true).unwrap();
        assert_eq!(rule.ttl(None, 5_000), 1000);
        assert_eq!(rule.ttl(Some(4_400), 5_000), 400);
        assert_eq!(rule.ttl(Some(3_000), 5_000), 0);
        // Created in the future
        assert_eq!(rule.ttl(Some(6_000), 5_000), 0);
    }

    fn local_ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> u64 {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .unwrap()
            .timestamp_millis() as u64
    }

    #[test]
    fn test_ttl_expires_at_midnight_rolls_to_next_day() {
        let rule = Rule::compile(&PolicyOptions::new().expires_at("00:00"), true).unwrap();
        let now = local_ms(2024, 1, 15, 10, 0, 0);
        let midnight = local_ms(2024, 1, 16, 0, 0, 0);

        assert_eq!(rule.ttl(None, now), midnight - now);
    }

    #[test]
    fn test_ttl_expires_at_later_today() {
        let rule = Rule::compile(&PolicyOptions::new().expires_at("13:30"), true).unwrap();
        let created = local_ms(2024, 1, 15, 10, 0, 0);
        let now = local_ms(2024, 1, 15, 11, 0, 0);
        let cutoff = local_ms(2024, 1, 15, 13, 30, 0);

        assert_eq!(rule.ttl(Some(created), now), cutoff - now);
    }

    #[test]
    fn test_ttl_expires_at_passed() {
        let rule = Rule::compile(&PolicyOptions::new().expires_at("13:30"), true).unwrap();
        let created = local_ms(2024, 1, 15, 10, 0, 0);

        // Cutoff already reached
        assert_eq!(rule.ttl(Some(created), local_ms(2024, 1, 15, 13, 30, 0)), 0);
        // Older than a day
        assert_eq!(rule.ttl(Some(created), created + DAY_MS + 1), 0);
    }

    #[test]
    fn test_stale_in_resolve() {
        assert_eq!(StaleIn::After(10).resolve(0, 100), 10);
        assert_eq!(StaleIn::computed(|_, ttl| ttl / 2).resolve(0, 100), 50);
    }
}

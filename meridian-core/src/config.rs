//! Configuration types

use crate::constants::*;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// What the command router does with a data command aimed at a tenant that
/// is not `ActiveSync` and does not carry `forceLoad`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PausedTenantPolicy {
    /// Log a warning and dispatch anyway.
    #[default]
    Warn,
    /// Refuse with `CommandError::TenantNotActive`.
    Reject,
}

impl FromStr for PausedTenantPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warn" => Ok(PausedTenantPolicy::Warn),
            "reject" => Ok(PausedTenantPolicy::Reject),
            other => Err(ConfigError::InvalidValue {
                field: "paused_tenant_policy".to_string(),
                value: other.to_string(),
                reason: "expected 'warn' or 'reject'".to_string(),
            }),
        }
    }
}

/// Configuration for the sync core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Period of each hot tenant's refresh timer.
    pub sync_interval: Duration,
    /// Ceiling on concurrently hot tenants.
    pub max_active_tenants: usize,
    /// Page size; requested limits are capped to it.
    pub page_size: usize,
    /// Broadcast buffer per event subscriber.
    pub event_capacity: usize,
    /// Handling of data commands against cold tenants.
    pub paused_tenant_policy: PausedTenantPolicy,
    /// Try to activate tenants as they are registered.
    pub auto_activate_on_register: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_millis(DEFAULT_SYNC_INTERVAL_MS),
            max_active_tenants: DEFAULT_MAX_ACTIVE_TENANTS,
            page_size: DEFAULT_PAGE_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            paused_tenant_policy: PausedTenantPolicy::default(),
            auto_activate_on_register: true,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create SyncConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `MERIDIAN_SYNC_INTERVAL_MS`: refresh interval (default: 300000)
    /// - `MERIDIAN_MAX_ACTIVE_TENANTS`: hot-tenant ceiling (default: 4)
    /// - `MERIDIAN_PAGE_SIZE`: page size (default: 250)
    /// - `MERIDIAN_EVENT_CAPACITY`: event buffer (default: 1024)
    /// - `MERIDIAN_PAUSED_TENANT_POLICY`: `warn` or `reject` (default: warn)
    /// - `MERIDIAN_AUTO_ACTIVATE`: activate on registration (default: true)
    ///
    /// Unparseable values are reported rather than silently replaced.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sync_interval = match env_parse::<u64>(ENV_SYNC_INTERVAL_MS)? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.sync_interval,
        };
        let max_active_tenants =
            env_parse(ENV_MAX_ACTIVE_TENANTS)?.unwrap_or(defaults.max_active_tenants);
        let page_size = env_parse(ENV_PAGE_SIZE)?.unwrap_or(defaults.page_size);
        let event_capacity = env_parse(ENV_EVENT_CAPACITY)?.unwrap_or(defaults.event_capacity);
        let paused_tenant_policy = match std::env::var(ENV_PAUSED_TENANT_POLICY) {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.paused_tenant_policy,
        };
        let auto_activate_on_register = std::env::var(ENV_AUTO_ACTIVATE)
            .map(|s| s.to_lowercase() != "false" && s != "0")
            .unwrap_or(defaults.auto_activate_on_register);

        let config = Self {
            sync_interval,
            max_active_tenants,
            page_size,
            event_capacity,
            paused_tenant_policy,
            auto_activate_on_register,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the refresh interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the hot-tenant ceiling.
    pub fn with_max_active_tenants(mut self, max: usize) -> Self {
        self.max_active_tenants = max;
        self
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the event buffer capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the paused-tenant command policy.
    pub fn with_paused_tenant_policy(mut self, policy: PausedTenantPolicy) -> Self {
        self.paused_tenant_policy = policy;
        self
    }

    /// Enable or disable activation on registration.
    pub fn with_auto_activate(mut self, enabled: bool) -> Self {
        self.auto_activate_on_register = enabled;
        self
    }

    /// Refresh interval clamped into the allowed range.
    pub fn clamped_sync_interval(&self) -> Duration {
        clamp_sync_interval(self.sync_interval)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let interval_ms = self.sync_interval.as_millis();
        if interval_ms < MIN_SYNC_INTERVAL_MS as u128 || interval_ms > MAX_SYNC_INTERVAL_MS as u128
        {
            return Err(ConfigError::InvalidValue {
                field: "sync_interval".to_string(),
                value: format!("{}ms", interval_ms),
                reason: format!(
                    "must be between {}ms and {}ms",
                    MIN_SYNC_INTERVAL_MS, MAX_SYNC_INTERVAL_MS
                ),
            });
        }
        if self.max_active_tenants == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_active_tenants".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "page_size".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Clamp a refresh interval into `[MIN_SYNC_INTERVAL_MS, MAX_SYNC_INTERVAL_MS]`.
pub fn clamp_sync_interval(interval: Duration) -> Duration {
    interval.clamp(
        Duration::from_millis(MIN_SYNC_INTERVAL_MS),
        Duration::from_millis(MAX_SYNC_INTERVAL_MS),
    )
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "not a valid number".to_string(),
            }),
        Err(_) => Ok(None),
    }
}

//! Constants for the Meridian sync core
//!
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// ADMISSION
// ============================================================================

/// Default ceiling on concurrently hot (`ActiveSync`) tenants
pub const DEFAULT_MAX_ACTIVE_TENANTS: usize = 4;

/// Default background refresh interval in milliseconds (5 minutes)
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 300_000;

/// Shortest allowed refresh interval in milliseconds (10 seconds)
pub const MIN_SYNC_INTERVAL_MS: u64 = 10_000;

/// Longest allowed refresh interval in milliseconds (1 hour)
pub const MAX_SYNC_INTERVAL_MS: u64 = 3_600_000;

// ============================================================================
// PAGINATION
// ============================================================================

/// Fixed page size; also the cap applied to any requested limit
pub const DEFAULT_PAGE_SIZE: usize = 250;

// ============================================================================
// EVENTS
// ============================================================================

/// Default broadcast buffer per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// ============================================================================
// COMMANDS
// ============================================================================

pub const CMD_SYNC_GET_STATE: &str = "sync.getState";
pub const CMD_SYNC_SET_STATE: &str = "sync.setState";
pub const CMD_SYNC_PAUSE: &str = "sync.pause";
pub const CMD_SYNC_RESUME: &str = "sync.resume";

/// Sync-control command types; these skip tenant-state validation.
pub const SYNC_CONTROL_COMMANDS: [&str; 4] = [
    CMD_SYNC_GET_STATE,
    CMD_SYNC_SET_STATE,
    CMD_SYNC_PAUSE,
    CMD_SYNC_RESUME,
];

/// Payload flag that bypasses sync-state gating for data commands
pub const FORCE_LOAD_FLAG: &str = "forceLoad";

// ============================================================================
// ENVIRONMENT
// ============================================================================

pub const ENV_SYNC_INTERVAL_MS: &str = "MERIDIAN_SYNC_INTERVAL_MS";
pub const ENV_MAX_ACTIVE_TENANTS: &str = "MERIDIAN_MAX_ACTIVE_TENANTS";
pub const ENV_PAGE_SIZE: &str = "MERIDIAN_PAGE_SIZE";
pub const ENV_EVENT_CAPACITY: &str = "MERIDIAN_EVENT_CAPACITY";
pub const ENV_PAUSED_TENANT_POLICY: &str = "MERIDIAN_PAUSED_TENANT_POLICY";
pub const ENV_AUTO_ACTIVATE: &str = "MERIDIAN_AUTO_ACTIVATE";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interval_within_bounds() {
        assert!(DEFAULT_SYNC_INTERVAL_MS >= MIN_SYNC_INTERVAL_MS);
        assert!(DEFAULT_SYNC_INTERVAL_MS <= MAX_SYNC_INTERVAL_MS);
    }

    #[test]
    fn test_sync_control_commands_are_distinct() {
        let mut sorted = SYNC_CONTROL_COMMANDS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), SYNC_CONTROL_COMMANDS.len());
    }
}

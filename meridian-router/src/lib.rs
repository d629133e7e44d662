//! MERIDIAN Router - Reads, Commands and Wiring
//!
//! The entry points a host application talks to:
//!
//! - [`data`]: [`DataAccessRouter`] answers object queries from the cache
//!   for hot tenants and from the external source otherwise
//! - [`command`]: [`CommandRouter`] dispatches typed commands to registered
//!   handlers, gated by tenant sync state
//! - [`control`]: built-in `sync.*` handlers over the admission controller
//! - [`context`]: [`SyncContext`] builds and owns all of the above
//! - [`telemetry`]: tracing subscriber setup
//!
//! ```ignore
//! let ctx = SyncContext::init(SyncConfig::from_env()?, source, registry).await?;
//! ctx.add_tenant(&TenantId::from("acme"));
//! let page = ctx
//!     .data()
//!     .get_objects(&TenantId::from("acme"), ObjectType::Sources, &ObjectQuery::new())
//!     .await?;
//! ctx.dispose().await;
//! ```

pub mod command;
pub mod context;
pub mod control;
pub mod data;
pub mod telemetry;

pub use command::{CommandHandler, CommandRouter};
pub use context::{SyncContext, TenantAdded};
pub use control::{register_sync_control_handlers, SyncControl, SyncControlHandler};
pub use data::{DataAccessRouter, DataOrigin, ObjectPage, ObjectQuery};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};

//! Meridian Admission - Which Tenants May Sync
//!
//! The [`AdmissionController`] is the single source of truth for per-tenant
//! sync state. It enforces a fixed ceiling on concurrently hot
//! (`ActiveSync`) tenants and drives one refresh timer per hot tenant; each
//! tick publishes [`meridian_core::SyncEvent::RefreshTriggered`].
//!
//! Rejections are reported as `false`, never as errors:
//!
//! ```ignore
//! if !admission.resume_sync(&tenant_id) {
//!     tracing::info!(%tenant_id, "All sync slots are taken");
//! }
//! ```

pub mod controller;
pub mod timer;

pub use controller::AdmissionController;
pub use timer::RefreshTimer;

//! # Live Data
//!
//! The reconciliation layer shared by every dashboard page: a merge that keeps
//! unchanged entities by reference, a debounced refresh trigger, and the
//! generic `LiveResource` page hook that composes both with a room connection.
//!
//! ## Contained Modules:
//!
//! - **`reconcile`**: identity-preserving merge of keyed collections.
//! - **`debounce`**: status filtering and quiet-window coalescing of events.
//! - **`page_hook`**: `LiveSpec` (the per-domain parameters) and the mounted
//!   `LiveResource` exposing data, status, last error and `refetch()`.

/// Identity-preserving merge.
pub mod reconcile;
/// Debounced refresh trigger.
pub mod debounce;
/// Generic page hook.
pub mod page_hook;

pub use debounce::{DebouncedTrigger, LivePolicy, StatusFilter, DEFAULT_DEBOUNCE_WINDOW};
pub use page_hook::{HookSnapshot, HookStatus, LiveResource, LiveSpec, RefreshOutcome};
pub use reconcile::{merge, merge_with_report, Collection, MergeReport};

//! Document → object reconciliation.
//!
//! # Data Flow
//! ```text
//! Document (Object)
//!     → Reconciler::apply(target)
//!         for each key, in document order:
//!             → BindingResolver::resolve(type, key)      (memoised, failures too)
//!                 none → UnknownKey diagnostic (unless `__`-prefixed)
//!             → assemble candidate (converter / allocator / default / serde)
//!             → preservation: keep live Shared<T> when both sides are non-null
//!             → pre-change hook ── false ──→ vetoed, field untouched
//!             → commit field (unless vetoed)
//!             → descend into nested objects (same algorithm, recursively)
//!             → on-change hook with the final value (unless vetoed)
//! ```
//!
//! # Design Decisions
//! - Bindings are declared per type through `Configurable::declare`; the
//!   resolver validates them on first use and caches the outcome
//! - An apply is not atomic: a fatal error leaves earlier keys committed
//! - A veto skips the field write and the on-change hook; nested objects
//!   are still reconciled, so preserved instances pick up their new fields
//! - Polymorphic elements are `Shared<dyn Trait>` built by allocators

pub mod binding;
pub mod error;
pub mod reconciler;
pub mod resolver;

pub use binding::{
    shared, Binding, Configurable, Element, FieldOptions, FieldValue, Outcome, Reconcile, Schema, Shape, Shared,
    Strategy,
};
pub use error::{ConfigError, Diagnostic};
pub use reconciler::{ApplyContext, ApplyReport, Capabilities, Reconciler, DEFAULT_DISCRIMINATOR, DEFAULT_IGNORE_PREFIX};
pub use resolver::BindingResolver;

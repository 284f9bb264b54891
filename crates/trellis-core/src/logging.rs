//! Tracing targets and spans.
//!
//! Nothing here installs a subscriber; hosts pick their own. Events are
//! emitted under the [`targets`] below, so observer chatter and queue drains
//! can be filtered separately:
//!
//! ```text
//! RUST_LOG=trellis_core::lifecycle=trace,trellis::binding=debug
//! ```
//!
//! Queue drains and dirty-check polls run inside a [`PerfSpan`], which makes
//! their duration visible to any span-timing subscriber.

/// Span names used throughout Trellis for tracing.
pub mod span_names {
    /// Lifecycle queue processing span.
    pub const LIFECYCLE: &str = "trellis::lifecycle";
    /// Collection flush span.
    pub const FLUSH: &str = "trellis::flush";
    /// Dirty-check poll span.
    pub const DIRTY_CHECK: &str = "trellis::dirty_check";
}

/// `tracing` targets, one per subsystem.
pub mod targets {
    /// Parent of every `trellis_core` target.
    pub const CORE: &str = "trellis_core";
    /// Observer locator and observers.
    pub const OBSERVATION: &str = "trellis_core::observation";
    /// Lifecycle queues and tasks.
    pub const LIFECYCLE: &str = "trellis_core::lifecycle";
    /// Dirty-check fallback.
    pub const DIRTY_CHECK: &str = "trellis_core::dirty_check";
    /// Binding objects.
    pub const BINDING: &str = "trellis::binding";
    /// Expression parsing and evaluation.
    pub const EXPRESSION: &str = "trellis::expression";
}

/// A guard that keeps a tracing span entered until dropped.
///
/// This is useful for tracking the duration of queue drains.
#[derive(Debug)]
pub struct PerfSpan {
    _entered: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Enters an info span named `name` under `trellis::perf`.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "trellis::perf", "perf", operation = name);
        Self {
            _entered: span.entered(),
        }
    }
}

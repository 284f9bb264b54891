//! Flags threaded through every observation and lifecycle call.

use bitflags::bitflags;

bitflags! {
    /// Describes where a call originates and which direction an update flows.
    ///
    /// Observers add [`UPDATE_TARGET_INSTANCE`](Self::UPDATE_TARGET_INSTANCE)
    /// when a source-side value changes; target-side observers deliver
    /// [`UPDATE_SOURCE_EXPRESSION`](Self::UPDATE_SOURCE_EXPRESSION).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LifecycleFlags: u32 {
        /// No flags.
        const NONE                         = 0;
        /// Originates from the start of an asynchronous task.
        const FROM_START_TASK              = 1 << 0;
        /// Originates from the end of an asynchronous task.
        const FROM_STOP_TASK               = 1 << 1;
        /// Originates from a bind call.
        const FROM_BIND                    = 1 << 2;
        /// Originates from an unbind call.
        const FROM_UNBIND                  = 1 << 3;
        /// Originates from an attach call.
        const FROM_ATTACH                  = 1 << 4;
        /// Originates from a detach call.
        const FROM_DETACH                  = 1 << 5;
        /// Originates from a flush queue drain.
        const FROM_FLUSH                   = 1 << 6;
        /// The flush was requested synchronously by a phase.
        const FROM_SYNC_FLUSH              = 1 << 7;
        /// The flush was scheduled on the microtask queue.
        const FROM_ASYNC_FLUSH             = 1 << 8;
        /// Originates from a dirty-checker tick.
        const FROM_TICK                    = 1 << 9;
        /// A source value changed; the target must be refreshed.
        const UPDATE_TARGET_INSTANCE       = 1 << 10;
        /// A target value changed; the source expression must be assigned.
        const UPDATE_SOURCE_EXPRESSION     = 1 << 11;
        /// Calling a missing function is an error instead of yielding undefined.
        const MUST_EVALUATE                = 1 << 12;
        /// Scope lookups may continue through `parent_scope` links.
        const ALLOW_PARENT_SCOPE_TRAVERSAL = 1 << 13;
        /// The notification comes from a collection mutation batch.
        const IS_COLLECTION_MUTATION       = 1 << 14;

        /// Any lifecycle-phase origin.
        const FROM_LIFECYCLE = Self::FROM_BIND.bits()
            | Self::FROM_UNBIND.bits()
            | Self::FROM_ATTACH.bits()
            | Self::FROM_DETACH.bits();
        /// Either update direction.
        const UPDATE = Self::UPDATE_TARGET_INSTANCE.bits() | Self::UPDATE_SOURCE_EXPRESSION.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_groups() {
        assert!(LifecycleFlags::FROM_LIFECYCLE.contains(LifecycleFlags::FROM_DETACH));
        assert!(!LifecycleFlags::FROM_LIFECYCLE.contains(LifecycleFlags::FROM_FLUSH));
        assert!(LifecycleFlags::UPDATE.contains(LifecycleFlags::UPDATE_SOURCE_EXPRESSION));
    }
}

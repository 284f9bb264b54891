//! Prelude module for Trellis.
//!
//! Re-exports the types most binding code needs:
//!
//! ```
//! use trellis::prelude::*;
//! ```

// ============================================================================
// Values and Flags
// ============================================================================

pub use trellis_core::{ArrayRef, FunctionRef, LifecycleFlags, MapRef, ObjectRef, SetRef, Value};

// ============================================================================
// Expressions and Scopes
// ============================================================================

pub use crate::ast::{Expression, ExpressionRef};
pub use crate::parser::{BindingType, ExpressionParser};
pub use crate::scope::{OverrideContext, Scope};

// ============================================================================
// Bindings
// ============================================================================

pub use crate::binding::{Bindable, Binding, BindingCommand, BindingInstruction, BindingMode};
pub use crate::resources::{FnValueConverter, ResourceRegistry, ServiceLocator, ValueConverter};

// ============================================================================
// Views and Runtime
// ============================================================================

pub use crate::runtime::{Runtime, RuntimeBuilder, RuntimeConfig};
pub use crate::view::{NoHooks, View, ViewHooks};

pub use crate::Error;

//! Trellis - reactive data binding.
//!
//! This crate builds on the observation and lifecycle layer in
//! [`trellis_core`] and provides:
//!
//! - **Expressions**: a parser for binding expressions, interpolations and
//!   for-of declarations, producing an immutable, cacheable syntax tree
//!   that can be evaluated, assigned through, and connected to observers
//! - **Scopes**: binding contexts layered with override contexts
//! - **Resources**: value converters and binding behaviors looked up by
//!   name through a service locator
//! - **Bindings**: property, call, ref, interpolation and let bindings with
//!   one-time, to-view, from-view and two-way modes
//! - **Views**: trees of bindings driven through batched bind, attach,
//!   detach and unbind phases
//!
//! # Example
//!
//! ```
//! use trellis::prelude::*;
//!
//! let runtime = Runtime::new();
//! let input = ObjectRef::new();
//! let view = runtime
//!     .create_view(
//!         NoHooks,
//!         &[(
//!             Value::Object(input.clone()),
//!             BindingInstruction::new(BindingCommand::TwoWay, "value", "user.name"),
//!         )],
//!     )
//!     .unwrap();
//!
//! let user = ObjectRef::from_pairs([("name", "Ada")]);
//! let vm = ObjectRef::from_pairs([("user", Value::Object(user.clone()))]);
//! view.bind(LifecycleFlags::NONE, &Scope::create(vm).unwrap()).unwrap();
//! view.attach(LifecycleFlags::NONE);
//! assert_eq!(input.get("value"), Value::from("Ada"));
//!
//! // Typing into the input updates the model...
//! input.set("value", "Grace");
//! assert_eq!(user.get("name"), Value::from("Grace"));
//!
//! // ...and model changes reach the input on the next flush.
//! user.set("name", "Alan");
//! runtime.lifecycle().drain_microtasks();
//! assert_eq!(input.get("value"), Value::from("Alan"));
//! ```

pub mod ast;
pub mod binding;
mod error;
pub mod parser;
pub mod prelude;
pub mod resources;
pub mod runtime;
pub mod scope;
pub mod view;

pub use error::{Error, Result};

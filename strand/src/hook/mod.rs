//! The hook pipeline: in-process interception at every lifecycle boundary.
//!
//! Hooks are plain async functions registered per [`HookEvent`]. Each
//! callback receives a typed [`HookInput`] and returns a [`HookOutput`]
//! whose optional fields carry decisions: permission verdicts,
//! short-circuit results, retry requests, and input rewrites. Dispatch is
//! ordered and cooperative; aggregation rules live in
//! [`HookRegistry::dispatch`].

pub mod builtins;
mod event;
mod matcher;
mod output;
mod registry;

pub use event::{HookEvent, HookInput};
pub use matcher::Matcher;
pub use output::{HookOutput, PermissionDecision};
pub use registry::{HookDispatch, HookFn, HookFuture, HookGroup, HookRegistry, hook};

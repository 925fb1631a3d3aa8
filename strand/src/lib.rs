#![cfg_attr(docsrs, feature(doc_cfg))]
//! Strand is the execution core of an LLM agent runtime: a
//! model-tool-interrupt loop driven to completion under hard constraints
//! on context size, concurrency, failure, and user approval.
//!
//! The crate is organized around four tightly coupled subsystems:
//!
//! - [`agent`] — the multi-step generate/tool/interrupt state machine.
//! - [`hook`] — ordered, composable interception at every lifecycle
//!   boundary, with permission, retry, cache, and guardrail semantics.
//! - [`context`] — a token-budgeted conversation compactor with
//!   synchronous and background scheduling, tiered and structured
//!   summarization, and pinning.
//! - [`task`] and [`checkpoint`] — a durable queue of out-of-band
//!   subagent executions with recovery, and suspendable checkpoints
//!   that encode interrupts.
//!
//! Model providers, filesystem backends, and memory loading are
//! collaborators consumed through traits ([`model::ModelProvider`],
//! [`backend::Backend`]); the core never talks to the network itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use strand::prelude::*;
//!
//! let agent = Agent::builder()
//!     .provider(provider)
//!     .tool(Arc::new(WriteTool::new(backend)))
//!     .permission_mode(PermissionMode::ApprovalRequired)
//!     .checkpointer(Arc::new(InMemoryCheckpointStore::new()))
//!     .build()?;
//!
//! match agent.generate("create hello.txt").await? {
//!     GenerateResult::Complete(c) => println!("{}", c.text),
//!     GenerateResult::Interrupted(i) => println!("awaiting approval: {}", i.interrupt.id),
//! }
//! ```

// Core data model
pub mod error;
pub mod message;
pub mod model;
pub mod signal;
pub mod state;
pub mod usage;

// Subsystems
pub mod agent;
pub mod checkpoint;
pub mod context;
pub mod hook;
pub mod task;
pub mod tool;

// Collaborator interfaces and primitives
pub mod backend;
pub mod memory;
pub mod retry;

pub mod prelude;

pub use error::{Error, Result};

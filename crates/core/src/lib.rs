//! # semloop Core
//!
//! Domain types, capability traits, and error definitions for the semloop
//! reasoning-loop engine. This crate has **no framework dependencies**;
//! it defines the contracts every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Each external capability is a trait here (`Provider`, `Tool`).
//! Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted stand-ins
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, ResolutionError, Result, ToolError};
pub use event::{EventBroadcaster, EventKind, ExecutionId, RunEvent, Subscription};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use tool::{SubAction, Tool, ToolCall, ToolDescriptor, ToolRegistry, ToolResult, ToolSet};

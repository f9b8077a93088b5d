//! Built-in tool implementations for semloop.
//!
//! Tools give the agent the ability to act: evaluate arithmetic, read the
//! clock and transform text. `math` and `text` are multitools, addressed
//! as `math__evaluate`, `text__upper` and so on.

pub mod clock;
pub mod math;
pub mod text;

use semloop_core::tool::ToolRegistry;

pub use clock::ClockTool;
pub use math::MathTool;
pub use text::TextTool;

/// Create a default tool registry with all built-in tools.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ClockTool));
    registry.register(Box::new(MathTool));
    registry.register(Box::new(TextTool));
    registry
}

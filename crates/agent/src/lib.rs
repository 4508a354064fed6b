//! Agent Runtime - tool-calling cost estimation loop
//!
//! This crate provides the "brain" of costscope:
//! - Normalizes reasoning-engine providers into one event vocabulary (`llm`)
//! - Manages the stateful calculation sandbox (`sandbox`, `calculation`)
//! - Routes tool requests to pricing lookups or the calculation tool (`tools`)
//! - Drives the plan-act-observe loop (`runtime`)
//! - Wraps everything in a scoped, always-torn-down estimation (`estimator`)
//!
//! # Architecture
//!
//! The agent follows a constrained loop:
//! 1. **Model call** - transcript and tool declarations go to the reasoning engine
//! 2. **Turn assembly** - the event stream is materialized before anything acts on it
//! 3. **Tool dispatch** - every request is answered, failures included, in request order
//! 4. **Final answer** - the first turn without tool requests ends the loop
//!
//! # Safety Principle
//!
//! The LLM never does arithmetic in its head. Unit prices come from the pricing
//! tools and totals from code run in the sandbox, which cannot call tools.

pub mod calculation;
pub mod estimator;
pub mod llm;
pub mod runtime;
pub mod sandbox;
pub mod tools;

pub use calculation::{CalculationTool, CALCULATION_TOOL_NAME};
pub use estimator::{CostEstimator, EstimatorSettings, McpPricingConnector, PricingConnector};
pub use runtime::{AgentOrchestrator, LoopState, OrchestratorSettings};
pub use sandbox::{SandboxSession, SandboxState};
pub use tools::{ToolBinding, ToolDispatcher};

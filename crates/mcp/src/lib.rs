//! Costscope pricing tool transport
//!
//! This crate hosts the client side of the AWS pricing MCP (Model Context
//! Protocol) server and exposes it to the agent as an external tool registry.
//!
//! ## Architecture
//!
//! - `ExternalToolRegistry`: uniform "list tools / invoke tool by name" contract
//!   with schema validation and scoped connect/disconnect
//! - `PricingTransport`: the wire seam; `McpPricingTransport` speaks MCP over a
//!   stdio child process, `fixtures::ScriptedPricingTransport` replays canned data
//! - `tools`: the pricing tool catalog the estimation prompt relies on
//!
//! ## Example Usage
//!
//! ```no_run
//! use costscope_core::config::AppConfig;
//! use costscope_core::credentials::AwsCredentials;
//! use costscope_mcp::{ExternalToolRegistry, McpPricingTransport, PricingServerLaunch};
//!
//! # async fn run() -> Result<(), costscope_core::ToolError> {
//! let config = AppConfig::default();
//! let credentials = AwsCredentials::new("AKIA...", "secret");
//! let launch = PricingServerLaunch::from_config(&config.pricing, &credentials, &config.aws.region);
//! let transport = McpPricingTransport::spawn(&launch).await?;
//! let registry = ExternalToolRegistry::connect(Box::new(transport)).await?;
//! println!("{} pricing tools", registry.list_tools().len());
//! registry.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod fixtures;
mod registry;
mod schema;
mod tools;
mod transport;

pub use client::{McpPricingTransport, PricingServerLaunch};
pub use registry::ExternalToolRegistry;
pub use schema::SchemaValidator;
pub use tools::*;
pub use transport::{PricingTransport, RemoteCallOutput};

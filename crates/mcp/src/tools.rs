//! Pricing tool catalog
//!
//! The estimation prompt walks the pricing server's tools in a fixed order:
//! discover service codes, their filterable attributes, the attribute values,
//! and finally the priced line items.

use costscope_core::ToolSpec;

/// Tool category trait
pub trait ToolCategory {
    /// Category name
    fn category_name() -> &'static str
    where
        Self: Sized;
    /// List of tool names in this category
    fn tool_names() -> &'static [&'static str]
    where
        Self: Sized;
}

/// Discovery tools: service codes, attributes, attribute values
pub struct DiscoveryTools;

/// Price lookup tools
pub struct PriceTools;

impl ToolCategory for DiscoveryTools {
    fn category_name() -> &'static str {
        "discovery"
    }
    fn tool_names() -> &'static [&'static str] {
        &[SERVICE_CODES_TOOL, SERVICE_ATTRIBUTES_TOOL, ATTRIBUTE_VALUES_TOOL]
    }
}

impl ToolCategory for PriceTools {
    fn category_name() -> &'static str {
        "price"
    }
    fn tool_names() -> &'static [&'static str] {
        &[PRICING_TOOL]
    }
}

pub const SERVICE_CODES_TOOL: &str = "get_pricing_service_codes";
pub const SERVICE_ATTRIBUTES_TOOL: &str = "get_pricing_service_attributes";
pub const ATTRIBUTE_VALUES_TOOL: &str = "get_pricing_attribute_values";
pub const PRICING_TOOL: &str = "get_pricing";

/// All pricing tool names the estimation workflow depends on
pub const REQUIRED_PRICING_TOOLS: &[&str] =
    &[SERVICE_CODES_TOOL, SERVICE_ATTRIBUTES_TOOL, ATTRIBUTE_VALUES_TOOL, PRICING_TOOL];

/// Names from the required catalog that a server did not advertise.
pub fn missing_pricing_tools(advertised: &[ToolSpec]) -> Vec<&'static str> {
    REQUIRED_PRICING_TOOLS
        .iter()
        .copied()
        .filter(|required| !advertised.iter().any(|spec| spec.name == *required))
        .collect()
}

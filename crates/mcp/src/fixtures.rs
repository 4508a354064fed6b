//! Scripted pricing transport for tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use costscope_core::{ToolError, ToolSpec};
use serde_json::{json, Map, Value};

use crate::tools::{ATTRIBUTE_VALUES_TOOL, PRICING_TOOL, SERVICE_ATTRIBUTES_TOOL, SERVICE_CODES_TOOL};
use crate::transport::{PricingTransport, RemoteCallOutput};

/// On-demand hourly price for a Linux t3.micro in us-east-1 used by the fixtures.
pub const T3_MICRO_HOURLY_USD: &str = "0.0104";

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Shared view of a scripted transport that has been moved into a registry.
#[derive(Clone, Default)]
pub struct TransportProbe {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    closes: Arc<AtomicUsize>,
}

impl TransportProbe {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct ScriptedPricingTransport {
    tools: Vec<ToolSpec>,
    responses: HashMap<String, RemoteCallOutput>,
    list_error: Option<ToolError>,
    probe: TransportProbe,
}

impl ScriptedPricingTransport {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self { tools, responses: HashMap::new(), list_error: None, probe: TransportProbe::default() }
    }

    /// The four pricing tools with argument schemas shaped like the real server's.
    pub fn with_pricing_catalog() -> Self {
        Self::new(pricing_catalog())
    }

    /// Pricing catalog answering an EC2 t3.micro lookup.
    pub fn with_ec2_t3_micro_pricing() -> Self {
        Self::with_pricing_catalog()
            .respond(SERVICE_CODES_TOOL, RemoteCallOutput::json(json!(["AmazonEC2", "AmazonS3", "AmazonRDS"])))
            .respond(
                SERVICE_ATTRIBUTES_TOOL,
                RemoteCallOutput::json(json!(["instanceType", "operatingSystem", "tenancy", "location"])),
            )
            .respond(ATTRIBUTE_VALUES_TOOL, RemoteCallOutput::json(json!({"instanceType": ["t3.micro", "t3.small"]})))
            .respond(
                PRICING_TOOL,
                RemoteCallOutput::json(json!({
                    "status": "success",
                    "service_name": "AmazonEC2",
                    "data": [{
                        "product": {"attributes": {
                            "instanceType": "t3.micro",
                            "operatingSystem": "Linux",
                            "location": "US East (N. Virginia)"
                        }},
                        "terms": {"OnDemand": {"priceDimensions": {
                            "unit": "Hrs",
                            "description": "$0.0104 per On Demand Linux t3.micro Instance Hour",
                            "pricePerUnit": {"USD": T3_MICRO_HOURLY_USD}
                        }}}
                    }]
                })),
            )
    }

    pub fn respond(mut self, name: &str, output: RemoteCallOutput) -> Self {
        self.responses.insert(name.to_string(), output);
        self
    }

    pub fn failing_list(mut self, error: ToolError) -> Self {
        self.list_error = Some(error);
        self
    }

    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl PricingTransport for ScriptedPricingTransport {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        match &self.list_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.tools.clone()),
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<RemoteCallOutput, ToolError> {
        if let Ok(mut calls) = self.probe.calls.lock() {
            calls.push(RecordedCall { name: name.to_string(), arguments });
        }
        Ok(self
            .responses
            .get(name)
            .cloned()
            .unwrap_or_else(|| RemoteCallOutput::json(json!({"status": "success", "data": []}))))
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn pricing_catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            SERVICE_CODES_TOOL,
            "List all AWS service codes that have pricing data.",
            json!({"type": "object", "properties": {}}),
        ),
        ToolSpec::new(
            SERVICE_ATTRIBUTES_TOOL,
            "List the filterable pricing attributes of one service.",
            json!({
                "type": "object",
                "properties": {"service_code": {"type": "string"}},
                "required": ["service_code"]
            }),
        ),
        ToolSpec::new(
            ATTRIBUTE_VALUES_TOOL,
            "List the possible values of pricing attributes for one service.",
            json!({
                "type": "object",
                "properties": {
                    "service_code": {"type": "string"},
                    "attribute_names": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["service_code", "attribute_names"]
            }),
        ),
        ToolSpec::new(
            PRICING_TOOL,
            "Fetch priced line items for a service in a region with optional attribute filters.",
            json!({
                "type": "object",
                "properties": {
                    "service_code": {"type": "string"},
                    "region": {"type": "string"},
                    "filters": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "Field": {"type": "string"},
                                "Value": {"type": "string"},
                                "Type": {"type": "string"}
                            },
                            "required": ["Field", "Value"]
                        }
                    }
                },
                "required": ["service_code", "region"]
            }),
        ),
    ]
}

//! Integration tests for the pricing tool registry
//!
//! These tests verify that the registry correctly handles:
//! - Tool listing
//! - Schema validation before any remote call
//! - Routing by name and result binding to the call id
//! - Scoped connect/disconnect

use costscope_core::{CallId, ToolError, ToolInvocationRequest, ToolResultContent, ToolStatus};
use costscope_mcp::fixtures::ScriptedPricingTransport;
use costscope_mcp::{ExternalToolRegistry, PRICING_TOOL, REQUIRED_PRICING_TOOLS, SERVICE_CODES_TOOL};
use serde_json::json;

fn request(id: &str, name: &str, arguments: serde_json::Value) -> ToolInvocationRequest {
    ToolInvocationRequest { call_id: CallId::new(id), name: name.to_string(), arguments }
}

#[tokio::test]
async fn test_list_tools() {
    let registry = ExternalToolRegistry::connect(Box::new(ScriptedPricingTransport::with_pricing_catalog()))
        .await
        .expect("connect");

    let names = registry.list_tools().iter().map(|spec| spec.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, REQUIRED_PRICING_TOOLS);
}

#[tokio::test]
async fn test_pricing_lookup_binds_call_id() {
    let transport = ScriptedPricingTransport::with_ec2_t3_micro_pricing();
    let probe = transport.probe();
    let registry = ExternalToolRegistry::connect(Box::new(transport)).await.expect("connect");

    let result = registry
        .invoke(&request(
            "call-7",
            PRICING_TOOL,
            json!({
                "service_code": "AmazonEC2",
                "region": "us-east-1",
                "filters": [{"Field": "instanceType", "Value": "t3.micro", "Type": "TERM_MATCH"}]
            }),
        ))
        .await
        .expect("pricing lookup");

    assert_eq!(result.call_id, CallId::new("call-7"));
    assert_eq!(result.status, ToolStatus::Success);
    let ToolResultContent::Json { value } = &result.content[0] else {
        panic!("expected structured pricing data");
    };
    assert_eq!(value["data"][0]["terms"]["OnDemand"]["priceDimensions"]["pricePerUnit"]["USD"], "0.0104");

    let calls = probe.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].arguments["service_code"], "AmazonEC2");
}

#[tokio::test]
async fn test_schema_violation_never_reaches_transport() {
    let transport = ScriptedPricingTransport::with_pricing_catalog();
    let probe = transport.probe();
    let registry = ExternalToolRegistry::connect(Box::new(transport)).await.expect("connect");

    let error = registry
        .invoke(&request("call-1", PRICING_TOOL, json!({"region": "us-east-1"})))
        .await
        .unwrap_err();

    match error {
        ToolError::SchemaViolation { tool, message } => {
            assert_eq!(tool, PRICING_TOOL);
            assert!(message.contains("service_code"));
        }
        other => panic!("expected schema violation, got {other:?}"),
    }
    assert!(probe.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_tool() {
    let registry = ExternalToolRegistry::connect(Box::new(ScriptedPricingTransport::with_pricing_catalog()))
        .await
        .expect("connect");

    let error = registry.invoke(&request("call-1", "get_weather", json!({}))).await.unwrap_err();
    assert_eq!(error, ToolError::UnknownTool("get_weather".to_string()));
}

#[tokio::test]
async fn test_disconnect_is_scoped_and_idempotent() {
    let transport = ScriptedPricingTransport::with_pricing_catalog();
    let probe = transport.probe();
    let registry = ExternalToolRegistry::connect(Box::new(transport)).await.expect("connect");
    assert!(registry.is_connected().await);

    registry.disconnect().await;
    registry.disconnect().await;
    assert_eq!(probe.close_count(), 1);
    assert!(!registry.is_connected().await);

    let error = registry.invoke(&request("call-2", SERVICE_CODES_TOOL, json!({}))).await.unwrap_err();
    assert!(matches!(error, ToolError::Unavailable(_)));
}

#[tokio::test]
async fn test_listing_failure_closes_transport() {
    let transport = ScriptedPricingTransport::with_pricing_catalog()
        .failing_list(ToolError::Unavailable("server exited".to_string()));
    let probe = transport.probe();

    let error = ExternalToolRegistry::connect(Box::new(transport)).await.err().expect("connect fails");
    assert!(matches!(error, ToolError::Unavailable(_)));
    assert_eq!(probe.close_count(), 1);
}

#[tokio::test]
async fn test_dropping_connected_registry_closes_transport() {
    let transport = ScriptedPricingTransport::with_pricing_catalog();
    let probe = transport.probe();
    let registry = ExternalToolRegistry::connect(Box::new(transport)).await.expect("connect");

    drop(registry);
    for _ in 0..100 {
        if probe.close_count() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(probe.close_count(), 1);
}

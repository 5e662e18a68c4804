//! Protocol type model.
//!
//! [`jsonrpc`] carries the JSON-RPC 2.0 envelopes, [`protocol`] the MCP
//! method params/results and notification payloads, [`capabilities`] the
//! negotiated capability structures.

pub mod capabilities;
pub mod jsonrpc;
pub mod protocol;

pub use capabilities::{
    ClientCapabilities, ElicitationCapabilities, LoggingCapabilities, PromptCapabilities,
    ResourceCapabilities, RootsCapabilities, SamplingCapabilities, ServerCapabilities,
    ToolCapabilities,
};
pub use jsonrpc::{ClientMessage, JsonRpcError, JsonRpcResponse, RequestId, ResponsePayload};
pub use protocol::{
    CallToolParams, CallToolResult, CancelledParams, Content, GetPromptParams, GetPromptResult,
    Implementation, InitializeParams, InitializeResult, ListPromptsParams, ListPromptsResult,
    ListResourceTemplatesParams, ListResourceTemplatesResult, ListResourcesParams,
    ListResourcesResult, ListToolsParams, ListToolsResult, LoggingLevel, ProgressToken,
    PromptArgument, PromptInfo, PromptMessage, ReadResourceParams, ReadResourceResult, RequestMeta,
    ResourceInfo, ResourceTemplate, Role, ServerNotification, SetLevelParams, SubscribeParams,
    SubscribeResult, SubscriptionInfo, Tool, ToolAnnotations, UnsubscribeParams, UnsubscribeResult,
};

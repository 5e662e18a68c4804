//! Tool catalog: definitions, materialized tools, and lookup.
//!
//! The runtime does not construct tools. An external loader (or the
//! [`ToolkitBuilder`] for tests and demos) delivers them fully materialized:
//! a definition with JSON-schema input/output descriptions plus a callable
//! handler. The catalog only stores, orders, and resolves them.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::server::execution::ToolContext;
use crate::types::protocol::{Tool, ToolAnnotations};

/// A secret a tool needs at runtime, injected by key from settings or env.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRequirement {
    /// Environment/settings key holding the secret value
    pub key: String,
}

/// Runtime authorization requirement declared by a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAuthRequirement {
    /// Auth provider id (e.g. "google")
    pub provider_id: String,
    /// Provider type (e.g. "oauth2")
    pub provider_type: String,
    /// OAuth scopes, if any
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Everything a tool needs before it can run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolRequirements {
    /// Secrets to inject into the tool context
    #[serde(default)]
    pub secrets: Vec<SecretRequirement>,
    /// Authorization, if the tool needs a user token
    #[serde(default)]
    pub authorization: Option<ToolAuthRequirement>,
}

/// Immutable description of a tool.
///
/// The fully-qualified name (`toolkit.name`) is unique within a catalog and
/// stable across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Bare tool name
    pub name: String,
    /// Owning toolkit (namespace)
    pub toolkit: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for arguments (object schema)
    pub input_schema: Value,
    /// JSON Schema for structured output, if declared
    pub output_schema: Option<Value>,
    /// Secrets and authorization the tool needs
    #[serde(default)]
    pub requirements: ToolRequirements,
    /// Behavior hints
    #[serde(default)]
    pub annotations: ToolAnnotations,
}

impl ToolDefinition {
    /// `toolkit.name`, the catalog key.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.toolkit, self.name)
    }

    /// Wire representation for `tools/list`.
    pub fn to_listed_tool(&self) -> Tool {
        Tool {
            name: self.fully_qualified_name(),
            title: self.annotations.title.clone(),
            description: Some(self.description.clone()),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            annotations: if self.annotations == ToolAnnotations::default() {
                None
            } else {
                Some(self.annotations.clone())
            },
        }
    }
}

/// The callable side of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with validated arguments and a per-invocation
    /// context. Errors become `CallToolResult{isError:true}` at the executor
    /// boundary, never protocol failures.
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnToolHandler<F> {
    f: F,
}

impl<F> FnToolHandler<F> {
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnToolHandler<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value> {
        (self.f)(args, ctx).await
    }
}

/// A definition bound to its handler, with a compiled argument validator.
///
/// Created at load time; replaced only when the incoming definition differs
/// by FQN or input/output schema (the managers gate on [`Self::definition_eq`]).
#[derive(Clone)]
pub struct MaterializedTool {
    /// The tool's definition
    pub definition: ToolDefinition,
    /// The tool's callable
    pub handler: Arc<dyn ToolHandler>,
    validator: Option<Arc<jsonschema::Validator>>,
}

impl std::fmt::Debug for MaterializedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializedTool")
            .field("name", &self.definition.fully_qualified_name())
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl MaterializedTool {
    /// Bind a definition to a handler, compiling the input schema validator.
    ///
    /// A schema that fails to compile disables validation for this tool
    /// instead of failing registration.
    pub fn new(definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        let validator = jsonschema::validator_for(&definition.input_schema)
            .map(Arc::new)
            .map_err(|e| {
                tracing::warn!(
                    target: "mcp.catalog",
                    tool = %definition.fully_qualified_name(),
                    error = %e,
                    "input schema failed to compile; skipping argument validation"
                );
            })
            .ok();
        Self {
            definition,
            handler,
            validator,
        }
    }

    /// Validate arguments against the compiled input schema.
    pub fn validate_args(&self, args: &Value) -> Result<()> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        validator
            .validate(args)
            .map_err(|e| Error::validation(e.to_string()))
    }

    /// Equality used for update gating: FQN plus input/output schemas.
    pub fn definition_eq(&self, other: &Self) -> bool {
        self.definition.fully_qualified_name() == other.definition.fully_qualified_name()
            && self.definition.input_schema == other.definition.input_schema
            && self.definition.output_schema == other.definition.output_schema
    }
}

impl PartialEq for MaterializedTool {
    fn eq(&self, other: &Self) -> bool {
        self.definition_eq(other)
    }
}

/// Ordered set of materialized tools, keyed by fully-qualified name.
///
/// Iteration order is insertion order and stable for the process lifetime.
#[derive(Debug, Default, Clone)]
pub struct ToolCatalog {
    tools: IndexMap<String, MaterializedTool>,
}

impl ToolCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool under its fully-qualified name, replacing any existing
    /// entry.
    pub fn add(&mut self, tool: MaterializedTool) {
        self.tools
            .insert(tool.definition.fully_qualified_name(), tool);
    }

    /// Look up a tool. Accepts both the `toolkit.tool` spelling and the
    /// flattened `toolkit_tool` spelling some clients send.
    pub fn get(&self, name: &str) -> Result<&MaterializedTool> {
        if let Some(tool) = self.tools.get(name) {
            return Ok(tool);
        }
        if !name.contains('.') {
            // toolkit_tool to toolkit.tool, trying each underscore as the
            // namespace separator (tool names may themselves contain one)
            for (idx, _) in name.match_indices('_') {
                let mut candidate = name.to_string();
                candidate.replace_range(idx..=idx, ".");
                if let Some(tool) = self.tools.get(&candidate) {
                    return Ok(tool);
                }
            }
        }
        Err(Error::not_found(format!("tool '{name}' not found")))
    }

    /// Whether a tool exists under either spelling.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Iterate tools in stable insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MaterializedTool> {
        self.tools.values()
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Builder registering plain async functions as a named toolkit.
///
/// This is the in-crate stand-in for the external loader: enough for demo
/// servers and tests, nothing more.
pub struct ToolkitBuilder {
    toolkit: String,
    finished: Vec<MaterializedTool>,
    pending: Option<ToolDefinition>,
}

impl ToolkitBuilder {
    /// Start a toolkit with the given namespace.
    pub fn new(toolkit: impl Into<String>) -> Self {
        Self {
            toolkit: toolkit.into(),
            finished: Vec::new(),
            pending: None,
        }
    }

    /// Begin a tool with a name, description and input schema.
    pub fn tool(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        self.pending = Some(ToolDefinition {
            name: name.into(),
            toolkit: self.toolkit.clone(),
            description: description.into(),
            input_schema,
            output_schema: None,
            requirements: ToolRequirements::default(),
            annotations: ToolAnnotations::default(),
        });
        self
    }

    /// Declare an output schema for the pending tool.
    pub fn output_schema(mut self, schema: Value) -> Self {
        if let Some(def) = &mut self.pending {
            def.output_schema = Some(schema);
        }
        self
    }

    /// Declare a secret requirement for the pending tool.
    pub fn secret(mut self, key: impl Into<String>) -> Self {
        if let Some(def) = &mut self.pending {
            def.requirements.secrets.push(SecretRequirement { key: key.into() });
        }
        self
    }

    /// Declare an authorization requirement for the pending tool.
    pub fn requires_auth(
        mut self,
        provider_id: impl Into<String>,
        provider_type: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        if let Some(def) = &mut self.pending {
            def.requirements.authorization = Some(ToolAuthRequirement {
                provider_id: provider_id.into(),
                provider_type: provider_type.into(),
                scopes,
            });
        }
        self
    }

    /// Attach behavior annotations to the pending tool.
    pub fn annotations(mut self, annotations: ToolAnnotations) -> Self {
        if let Some(def) = &mut self.pending {
            def.annotations = annotations;
        }
        self
    }

    /// Finish the pending tool with its handler function.
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        if let Some(def) = self.pending.take() {
            self.finished
                .push(MaterializedTool::new(def, Arc::new(FnToolHandler::new(f))));
        }
        self
    }

    /// Add every finished tool to the catalog.
    ///
    /// Fails if a tool was declared without a handler.
    pub fn register(self, catalog: &mut ToolCatalog) -> Result<()> {
        if let Some(def) = &self.pending {
            return Err(Error::Configuration(format!(
                "tool '{}' declared without a handler",
                def.fully_qualified_name()
            )));
        }
        for tool in self.finished {
            catalog.add(tool);
        }
        Ok(())
    }
}

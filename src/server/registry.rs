//! Component managers for tools, resources, and prompts.
//!
//! Three near-identical registries keyed by string. Managers are passive:
//! no internal locking, no start/stop lifecycle. Concurrency is the server's
//! responsibility. `add` is equality-gated so reloading an unchanged
//! component never produces a spurious `*/list_changed` notification.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::catalog::{MaterializedTool, ToolCatalog};
use crate::error::{Error, Result};
use crate::types::protocol::{
    Content, GetPromptResult, PromptInfo, ReadResourceResult, ResourceInfo, ResourceTemplate, Tool,
};

/// Hook invoked with the affected key whenever a registry's contents change.
/// Used to enqueue `*/list_changed` notifications.
pub type UpdateHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Outcome of an equality-gated add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New key
    Inserted,
    /// Existing key, different value
    Updated,
    /// Existing key, equal value; nothing happened
    Unchanged,
}

/// Generic string-keyed registry with equality-gated updates.
pub struct Registry<T> {
    component: &'static str,
    entries: IndexMap<String, T>,
    on_update: Option<UpdateHook>,
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("component", &self.component)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<T: PartialEq> Registry<T> {
    /// Empty registry for the named component kind.
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            entries: IndexMap::new(),
            on_update: None,
        }
    }

    /// Install the change hook. Seeding done before this call stays silent.
    pub fn set_update_hook(&mut self, hook: UpdateHook) {
        self.on_update = Some(hook);
    }

    /// Insert or replace. Equal values are a no-op; inserts and replacements
    /// fire the update hook.
    pub fn add(&mut self, key: impl Into<String>, value: T) -> AddOutcome {
        let key = key.into();
        if let Some(existing) = self.entries.get(&key) {
            if *existing == value {
                return AddOutcome::Unchanged;
            }
            self.entries.insert(key.clone(), value);
            self.fire(&key);
            return AddOutcome::Updated;
        }
        self.entries.insert(key.clone(), value);
        self.fire(&key);
        AddOutcome::Inserted
    }

    /// Remove an entry, firing the update hook.
    pub fn remove(&mut self, key: &str) -> Result<T> {
        let removed = self.entries.shift_remove(key).ok_or_else(|| {
            Error::not_found(format!("{} '{key}' not found", self.component))
        })?;
        self.fire(key);
        Ok(removed)
    }

    /// Fetch an entry.
    pub fn get(&self, key: &str) -> Result<&T> {
        self.entries.get(key).ok_or_else(|| {
            Error::not_found(format!("{} '{key}' not found", self.component))
        })
    }

    /// Whether the key exists.
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// All entries in insertion order.
    pub fn list(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    /// All keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Drop every entry. Does not fire the hook.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fire(&self, key: &str) {
        if let Some(hook) = &self.on_update {
            hook(key);
        }
    }
}

/// Tool registry backed by the catalog.
///
/// The catalog is seeded at construction; add/remove keep it in sync and
/// fire the update hook for `notifications/tools/list_changed`.
pub struct ToolManager {
    catalog: ToolCatalog,
    on_update: Option<UpdateHook>,
}

impl std::fmt::Debug for ToolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolManager")
            .field("tools", &self.catalog.len())
            .finish()
    }
}

impl ToolManager {
    /// Wrap a loaded catalog.
    pub fn new(catalog: ToolCatalog) -> Self {
        tracing::info!(target: "mcp.managers", tools = catalog.len(), "tool manager initialized");
        Self {
            catalog,
            on_update: None,
        }
    }

    /// Install the change hook.
    pub fn set_update_hook(&mut self, hook: UpdateHook) {
        self.on_update = Some(hook);
    }

    /// Resolve a tool by either spelling.
    pub fn get(&self, name: &str) -> Result<&MaterializedTool> {
        self.catalog.get(name)
    }

    /// List tools in catalog order, as wire descriptions.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.catalog
            .iter()
            .map(|t| t.definition.to_listed_tool())
            .collect()
    }

    /// Equality-gated add; replaced tools fire the update hook.
    pub fn add(&mut self, tool: MaterializedTool) -> AddOutcome {
        let name = tool.definition.fully_qualified_name();
        let outcome = match self.catalog.get(&name) {
            Ok(existing) if existing.definition_eq(&tool) => AddOutcome::Unchanged,
            Ok(_) => AddOutcome::Updated,
            Err(_) => AddOutcome::Inserted,
        };
        if outcome != AddOutcome::Unchanged {
            self.catalog.add(tool);
            if let Some(hook) = &self.on_update {
                hook(&name);
            }
        }
        outcome
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}

/// Serves the contents of a registered resource.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Read the resource addressed by `uri`.
    async fn read(&self, uri: &str) -> Result<ReadResourceResult>;
}

/// Resource whose contents are a fixed string.
pub struct StaticTextResource {
    text: String,
    mime_type: Option<String>,
}

impl StaticTextResource {
    /// Build from text and an optional MIME type.
    pub fn new(text: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            text: text.into(),
            mime_type,
        }
    }
}

#[async_trait]
impl ResourceHandler for StaticTextResource {
    async fn read(&self, uri: &str) -> Result<ReadResourceResult> {
        Ok(ReadResourceResult {
            contents: vec![Content::Resource {
                uri: uri.to_string(),
                text: Some(self.text.clone()),
                mime_type: self.mime_type.clone(),
            }],
        })
    }
}

/// A registered resource: wire description plus its reader.
#[derive(Clone)]
pub struct ResourceEntry {
    /// Wire description
    pub info: ResourceInfo,
    /// Contents provider
    pub handler: Arc<dyn ResourceHandler>,
}

impl PartialEq for ResourceEntry {
    fn eq(&self, other: &Self) -> bool {
        // Handlers are opaque; equality gates on the description.
        self.info == other.info
    }
}

/// Resource registry: resources keyed by URI, templates keyed by URI
/// template.
#[derive(Debug)]
pub struct ResourceManager {
    resources: Registry<ResourceEntry>,
    templates: Registry<ResourceTemplate>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self {
            resources: Registry::new("resource"),
            templates: Registry::new("resource template"),
        }
    }

    /// Install the change hook on the resource registry.
    pub fn set_update_hook(&mut self, hook: UpdateHook) {
        self.resources.set_update_hook(hook);
    }

    /// Register a resource.
    pub fn add(&mut self, entry: ResourceEntry) -> AddOutcome {
        self.resources.add(entry.info.uri.clone(), entry)
    }

    /// Remove a resource by URI.
    pub fn remove(&mut self, uri: &str) -> Result<ResourceEntry> {
        self.resources.remove(uri)
    }

    /// Register a resource template.
    pub fn add_template(&mut self, template: ResourceTemplate) -> AddOutcome {
        self.templates
            .add(template.uri_template.clone(), template)
    }

    /// List resources in registration order.
    pub fn list(&self) -> Vec<ResourceInfo> {
        self.resources.list().map(|e| e.info.clone()).collect()
    }

    /// List templates in registration order.
    pub fn list_templates(&self) -> Vec<ResourceTemplate> {
        self.templates.list().cloned().collect()
    }

    /// The contents provider for a URI. Cloned out so callers never hold
    /// the registry across the read await.
    pub fn handler_for(&self, uri: &str) -> Result<Arc<dyn ResourceHandler>> {
        self.resources
            .get(uri)
            .map(|e| e.handler.clone())
            .map_err(|_| Error::Resource(format!("resource '{uri}' not found")))
    }

    /// Read a resource by URI.
    pub async fn read(&self, uri: &str) -> Result<ReadResourceResult> {
        let handler = self.handler_for(uri)?;
        handler.read(uri).await
    }

    /// Whether the URI is registered.
    pub fn has(&self, uri: &str) -> bool {
        self.resources.has(uri)
    }
}

/// Renders a prompt from validated arguments.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Produce the prompt's message list.
    async fn render(&self, args: HashMap<String, String>) -> Result<GetPromptResult>;
}

/// A registered prompt: wire description plus its renderer.
#[derive(Clone)]
pub struct PromptEntry {
    /// Wire description, including declared arguments
    pub info: PromptInfo,
    /// Renderer
    pub handler: Arc<dyn PromptHandler>,
}

impl PartialEq for PromptEntry {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info
    }
}

impl PromptEntry {
    /// Render after checking that every declared required argument is
    /// present.
    pub async fn render_validated(
        &self,
        args: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        if let Some(declared) = &self.info.arguments {
            for arg in declared.iter().filter(|a| a.required) {
                if !args.contains_key(&arg.name) {
                    return Err(Error::Prompt(format!(
                        "prompt '{}' missing required argument '{}'",
                        self.info.name, arg.name
                    )));
                }
            }
        }
        self.handler.render(args).await
    }
}

/// Prompt registry keyed by prompt name.
#[derive(Debug)]
pub struct PromptManager {
    prompts: Registry<PromptEntry>,
}

impl Default for PromptManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self {
            prompts: Registry::new("prompt"),
        }
    }

    /// Install the change hook.
    pub fn set_update_hook(&mut self, hook: UpdateHook) {
        self.prompts.set_update_hook(hook);
    }

    /// Register a prompt.
    pub fn add(&mut self, entry: PromptEntry) -> AddOutcome {
        self.prompts.add(entry.info.name.clone(), entry)
    }

    /// Remove a prompt by name.
    pub fn remove(&mut self, name: &str) -> Result<PromptEntry> {
        self.prompts.remove(name)
    }

    /// List prompts in registration order.
    pub fn list(&self) -> Vec<PromptInfo> {
        self.prompts.list().map(|e| e.info.clone()).collect()
    }

    /// Fetch a prompt entry by name, cloned out of the registry.
    pub fn get_entry(&self, name: &str) -> Result<PromptEntry> {
        self.prompts.get(name).cloned()
    }

    /// Render a prompt, checking required arguments first.
    pub async fn get(
        &self,
        name: &str,
        args: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        self.get_entry(name)?.render_validated(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::protocol::{PromptArgument, PromptMessage, Role};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn add_is_equality_gated() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut registry: Registry<String> = Registry::new("thing");
        let counter = fired.clone();
        registry.set_update_hook(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(registry.add("a", "one".to_string()), AddOutcome::Inserted);
        assert_eq!(registry.add("a", "one".to_string()), AddOutcome::Unchanged);
        assert_eq!(registry.add("a", "two".to_string()), AddOutcome::Updated);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remove_unknown_key_is_not_found() {
        let mut registry: Registry<u32> = Registry::new("thing");
        assert!(matches!(registry.remove("nope"), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn resource_read_and_missing_uri() {
        let mut manager = ResourceManager::new();
        manager.add(ResourceEntry {
            info: ResourceInfo {
                uri: "file://notes.txt".into(),
                name: "notes".into(),
                description: None,
                mime_type: Some("text/plain".into()),
            },
            handler: Arc::new(StaticTextResource::new(
                "hello",
                Some("text/plain".into()),
            )),
        });

        let result = manager.read("file://notes.txt").await.unwrap();
        match &result.contents[0] {
            Content::Resource { uri, text, .. } => {
                assert_eq!(uri, "file://notes.txt");
                assert_eq!(text.as_deref(), Some("hello"));
            },
            other => panic!("unexpected content: {other:?}"),
        }

        let err = manager.read("file://missing.txt").await.unwrap_err();
        assert!(matches!(err, Error::Resource(_)));
        assert_eq!(err.json_rpc_code(), crate::error::codes::RESOURCE_NOT_FOUND);
    }

    struct EchoPrompt;

    #[async_trait]
    impl PromptHandler for EchoPrompt {
        async fn render(&self, args: HashMap<String, String>) -> Result<GetPromptResult> {
            let topic = args.get("topic").cloned().unwrap_or_default();
            Ok(GetPromptResult {
                description: None,
                messages: vec![PromptMessage {
                    role: Role::User,
                    content: Content::Text {
                        text: format!("Tell me about {topic}"),
                    },
                }],
            })
        }
    }

    #[tokio::test]
    async fn prompt_required_argument_validation() {
        let mut manager = PromptManager::new();
        manager.add(PromptEntry {
            info: PromptInfo {
                name: "explain".into(),
                description: None,
                arguments: Some(vec![PromptArgument {
                    name: "topic".into(),
                    description: None,
                    required: true,
                }]),
            },
            handler: Arc::new(EchoPrompt),
        });

        let err = manager.get("explain", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Prompt(_)));

        let mut args = HashMap::new();
        args.insert("topic".to_string(), "queues".to_string());
        let result = manager.get("explain", args).await.unwrap();
        assert_eq!(result.messages.len(), 1);
    }
}

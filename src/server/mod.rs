//! Server core: dispatcher, sessions, managers, notifications, execution.

pub mod auth;
pub mod core;
pub mod execution;
pub mod middleware;
pub mod notifications;
pub mod registry;
pub mod requests;
pub mod session;

pub use auth::{Authorizer, MockAuthorizer, RemoteAuthorizer};
pub use core::McpServer;
pub use execution::{ToolContext, ToolExecutor};
pub use middleware::{Middleware, MiddlewareChain, MiddlewareContext};
pub use notifications::{NotificationManager, NotificationSender};
pub use registry::{
    PromptEntry, PromptHandler, PromptManager, ResourceEntry, ResourceHandler, ResourceManager,
    StaticTextResource, ToolManager,
};
pub use requests::RequestManager;
pub use session::{InitializationState, Session};

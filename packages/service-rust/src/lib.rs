//! Plexus Service: option aggregation, middleware chains, and lifecycle orchestration.

pub mod cmd;
pub mod config;
pub mod debug;
pub mod defaults;
pub mod error;
pub mod event;
pub mod hooks;
pub mod lifecycle;
pub mod options;
pub mod plugin;
pub mod service;
pub mod wrapper;

pub use cmd::{Cmd, Flags};
pub use config::ServiceConfig;
pub use defaults::Defaults;
pub use error::ServiceError;
pub use event::Event;
pub use hooks::Hook;
pub use lifecycle::LifecycleState;
pub use options::{ServiceOption, ServiceOptions};
pub use plugin::{Catalog, Plugin, PluginCatalog, PluginLoader, SubsystemKind};
pub use service::Service;

//! Fatal service initialisation errors.

use crate::plugin::SubsystemKind;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Command line could not be parsed, or help/version was requested.
    #[error(transparent)]
    Flags(#[from] clap::Error),

    #[error("failed to load plugin {name}: {source}")]
    PluginLoad {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to initialise plugin {name}: {source}")]
    PluginInit {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown {kind} implementation: {name}")]
    UnknownImplementation { kind: SubsystemKind, name: String },

    #[error("{kind} rejected configuration: {source}")]
    Collaborator {
        kind: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("command action failed: {0}")]
    Action(#[source] anyhow::Error),
}

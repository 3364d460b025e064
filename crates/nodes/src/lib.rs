//! `nodes` crate: the `ExecutableNode` trait and built-in node implementations.
//!
//! Every node, built-in or plugin, must implement [`ExecutableNode`].
//! The engine crate dispatches execution through this trait object, looked up
//! in a [`NodeRegistry`].

pub mod builtin;
pub mod condition;
pub mod credentials;
pub mod error;
pub mod mock;
pub mod registry;
pub mod template;
pub mod traits;

pub use credentials::{CredentialStore, EnvCredentialStore, InMemoryCredentialStore};
pub use error::NodeError;
pub use registry::NodeRegistry;
pub use traits::{
    ExecutableNode, ExecutionContext, NodeCategory, NodeDescriptor, NodeEvent, NodeEventEnvelope,
    NodeEventSink,
};

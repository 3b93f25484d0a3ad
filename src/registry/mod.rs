//! # Task registration: definitions, handlers, registry, manifest loader.
//!
//! Every path into the runtime ends in [`TaskRegistry::register`]:
//! - the host registers [`TaskDefinition`]s directly at startup, or
//! - the manifest loader binds a discovery manifest to host handlers.
//!
//! The registry is shared by `Arc` and passed explicitly into the worker
//! pool; there is no hidden global.

mod definition;
mod handler;
mod manifest;
#[allow(clippy::module_inception)]
mod registry;

pub use definition::{AfterHook, BeforeHook, ErrorHook, Hooks, TaskDefinition, TaskDefinitionBuilder};
pub use handler::{HandlerRef, TaskFailure, TaskFn, TaskHandler};
pub use manifest::{
    load_manifest, register_from_manifest, HandlerBindings, ManifestEntry, ManifestMetadata,
    TaskManifest, MANIFEST_VERSION,
};
pub use registry::{RegisterMode, TaskRegistry};

//! Device import workflow
//!
//! Takes a discovered device into the monitored fleet: duplicate detection for
//! mesh devices, form validation, the import call and the optional agent
//! install with install-only retries.

pub mod coordinator;
pub mod duplicate;
pub mod install;
pub mod model;
pub mod services;
pub mod validation;
pub mod workflow;

#[cfg(test)]
pub(crate) mod fakes;

pub use model::{CredentialDirectory, DiscoveredDevice, ImportRequest};
pub use services::Services;
pub use workflow::{ImportSession, Phase, WorkflowState};

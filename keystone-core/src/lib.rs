//! Keystone Core
//!
//! Dependency-ordered, idempotent provisioning of a fixed cloud topology with
//! reverse-order rollback when any step fails

pub mod apply;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod output;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod rollback;
pub mod state;
pub mod topology;

#[cfg(test)]
mod test_support;

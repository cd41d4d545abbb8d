//! Command implementations for the `r2e` CLI.
//!
//! Each submodule corresponds to a top-level CLI command. Every command
//! takes a workspace file except `schema`,
//! which only needs a connection type name.

/// Historical-retention sweep — `r2e archive <workspace.json>`.
pub mod archive;

/// Workspace diagnostics — `r2e doctor <workspace.json>`.
pub mod doctor;

/// Namespace structure — `r2e namespace <workspace.json>`.
pub mod namespace;

/// Connection config schema — `r2e schema <connection-type>`.
pub mod schema;

/// System status — `r2e status <workspace.json>`.
pub mod status;

/// Topic listing/search — `r2e topics <workspace.json>`.
pub mod topics;

/// Connection config validation — `r2e validate <workspace.json>`.
pub mod validate;

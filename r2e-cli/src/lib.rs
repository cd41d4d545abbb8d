//! # r2e-cli
//!
//! Operator-facing command-line tool for inspecting and validating a UNS
//! data-integration workspace without standing up a live
//! hub process.
//!
//! A workspace file (see [`workspace`]) bundles an active hierarchy
//! template, optional auto-mapper tuning, a batch of sample ingest messages
//! standing in for live connection traffic, and connection configurations
//! to validate. Every command except `schema` loads one.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `r2e doctor <workspace.json>` | Sanity-check hierarchy, auto-map rules, and declared connections |
//! | `r2e namespace <workspace.json>` | Print the resolved namespace structure |
//! | `r2e schema <connection-type>` | Print a connection descriptor's config schema |
//! | `r2e status <workspace.json>` | Replay samples and print `getSystemStatus()` |
//! | `r2e topics <workspace.json>` | List/search registered topics |
//! | `r2e validate <workspace.json>` | Validate every declared connection's configuration |
//!
//! ## Architecture
//!
//! [`workspace`] owns the workspace file format and the in-memory
//! hub-and-replay helper every read command builds on. [`commands`] holds
//! one module per subcommand.

pub mod commands;
pub mod workspace;

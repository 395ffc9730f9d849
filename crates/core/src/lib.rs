//! Core library for aictx, the AI-assisted development workflow orchestrator.
//!
//! Provides the coordination substrate (typed errors, the event bus, the
//! service container, advisory locks, plugins, the central error handler and
//! JSON-file repositories) plus the task, session and feedback stores, git
//! and filesystem adapters, configuration, logging and the managers used by
//! the CLI.
//!
//! Quick start:
//! - Load config via `aictx_core::config::load(Some(project_root))`.
//! - Wire everything with `aictx_core::app::AppContext::bootstrap(root, config)`.
//! - Call managers through `AppContext::adapter` to get `_before`/`_after`
//!   events and uniform error handling.

pub mod adapters;
pub mod app;
pub mod config;
pub mod container;
pub mod domain;
pub mod error_handler;
pub mod errors;
pub mod events;
pub mod locks;
pub mod logging;
pub mod managers;
pub mod plugins;
pub mod repository;
pub mod storage;

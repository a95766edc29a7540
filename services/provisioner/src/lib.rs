//! Stack provisioning and cluster bootstrap engine.
//!
//! This crate primarily ships a `provisioner` binary, but exposes its
//! library surface for integration testing and for embedding with real cloud
//! and orchestrator backends.
//!
//! A flow is a fixed sequence of named transitions (`flow::Flow`). The
//! `flow::FlowManager` runs flows on a bounded executor, one per stack; the
//! `flow::FlowDispatcher` routes each transition to the stack or cluster
//! facade and pairs every failure with its handler.

pub mod api;
pub mod bootstrap;
pub mod cloud;
pub mod cluster_manager;
pub mod config;
pub mod context;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod facade;
pub mod flow;
pub mod orchestrator;
pub mod polling;
pub mod stack_creation;
pub mod state;
pub mod store;
pub mod worker;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a std mutex, recovering the data of a poisoned one.
pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

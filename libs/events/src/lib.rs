//! # stackflow-events
//!
//! Lifecycle vocabulary shared by the provisioning engine and its event sinks.
//!
//! ## Contents
//!
//! - `Status`: lifecycle state of a stack or cluster, and the derived
//!   `PollGroup` that tells pollers whether to keep waiting
//! - `LifecycleEvent`: the `(stack_id, event_type, message)` record handed to
//!   the external event sink
//! - `Notification`: the image-copy progress payload
//! - `MessageCode` / `MessageCatalog`: message keys and their rendering
//!
//! Status transitions are owned by the flow dispatcher; this crate only
//! describes them.

mod envelope;
mod error;
mod messages;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use messages::*;
pub use types::*;

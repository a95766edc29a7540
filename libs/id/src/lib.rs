//! # stackflow-id
//!
//! Identifier types shared by the provisioning engine.
//!
//! Two families of identifiers exist:
//!
//! - **Resource IDs** (`StackId`, `ClusterId`, `FlowId`, `RequestId`) use a
//!   prefixed ULID format, `{prefix}_{ulid}`, e.g.
//!   `stk_01HV4Z2WQXKJNM8GPQY6VBKC3D`. The prefix makes a leaked string
//!   self-describing and prevents passing a cluster id where a stack id is
//!   expected.
//! - **`PrivateId`** is the small numeric identity the engine assigns to each
//!   requested instance template. Cloud results refer back to instances by
//!   this number, so it is what reconciliation matches on.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

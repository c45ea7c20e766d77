//! pgw-core: Shared library for the portal gateway.
//!
//! Provides the error taxonomy, the vendor attribute-tree XML codec,
//! session record types, and session key generation.

pub mod attr;
pub mod error;
pub mod session;

// Re-export commonly used items at crate root.
pub use attr::{decode_tenant_names, AttrValue, QuerySpec};
pub use error::{GatewayError, GatewayResult};
pub use session::{generate_session_key, SessionRecord, SessionSummary};

//! pgw-client: Remote portal client for the portal gateway.
//!
//! `PortalClient` performs the credential exchange against a remote
//! administrative portal, then relays arbitrary authenticated calls using the
//! portal-issued session cookie. TLS verification is off by default (the
//! usual deployment talks to self-signed on-prem appliances) but is
//! configurable via [`ClientConfig::insecure`].

pub mod client;

pub use client::{ClientConfig, PortalClient, PortalResponse, SESSION_COOKIE};

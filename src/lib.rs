//! # API Management authorizations
//!
//! Management-plane client for the authorization-provider feature set of
//! Azure API Management: control-plane CRUD, a lazily loaded resource tree,
//! prompt-driven wizards, policy snippets and the OAuth redirect callback.

pub mod apim;
pub mod callback;
pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod host;
pub mod policy;
pub mod telemetry;
pub mod tree;
pub mod wizard;

//! API Management control-plane client.

pub mod contracts;
pub mod service;

pub use service::ApimService;

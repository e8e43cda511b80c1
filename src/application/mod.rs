//! Use cases: the authorization lifecycle and the machinery that keeps it
//! idempotent and serialized per authorization.

pub mod context;
pub mod idempotency;
pub mod locks;
pub mod service;

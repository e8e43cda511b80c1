//! Domain layer: value objects, the authorization entity, validation rules
//! and the ports the application layer depends on.

pub mod account;
pub mod authorization;
pub mod idempotency;
pub mod money;
pub mod payment;
pub mod ports;
pub mod validation;

//! Adapters for the domain ports: storage, clock, SCA and a sandbox rail.

pub mod clock;
pub mod in_memory;
pub mod otp;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod simulated_rail;

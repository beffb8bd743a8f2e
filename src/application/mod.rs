//! Application layer - Use case services and ports
//!
//! Services implement the build stages and resolvers over the domain
//! state; ports define the contracts infrastructure adapters must satisfy.

pub mod catalog;
pub mod ports;
pub mod services;

pub use catalog::Catalogs;

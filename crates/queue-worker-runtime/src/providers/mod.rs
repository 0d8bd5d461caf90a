//! Queue provider implementations.

pub mod azure;
pub mod memory;

pub use azure::{AzureError, AzureServiceBusProvider, ServiceBusConnectionString};
pub use memory::InMemoryProvider;

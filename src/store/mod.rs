//! Storage backends for the persistence ports.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::{PgConfirmationLedger, PgPolicyStore, PgStores, PgTokenStore};

//! The cookie/storage boundary behind the token store.
//!
//! The core never assumes a transport encoding; it only requires get/set
//! semantics over a small string map with the ability to expire every field
//! immediately (the logout path).

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::error::GatewayError;

#[derive(Debug, Error)]
#[error("session carrier error: {0}")]
pub struct CarrierError(pub String);

impl From<CarrierError> for GatewayError {
    fn from(err: CarrierError) -> Self {
        GatewayError::Persistence(err.0)
    }
}

/// Persistent per-session key/value carrier (cookies in the reference
/// deployment). Implementations must be thread-safe; a single carrier
/// instance belongs to exactly one logical user session.
pub trait SessionCarrier: Send + Sync {
    fn read_fields(&self) -> Result<HashMap<String, String>, CarrierError>;

    /// Persist `fields`. An empty value clears that field. With
    /// `expire_all_immediately` the carrier must mark every written field as
    /// expired for the client (used to log out by zeroing all fields at
    /// once).
    fn write_fields(
        &self,
        fields: HashMap<String, String>,
        expire_all_immediately: bool,
    ) -> Result<(), CarrierError>;
}

/// In-memory carrier. Reference implementation and test double; a real
/// deployment wraps the host framework's cookie jar instead.
#[derive(Default)]
pub struct MemoryCarrier {
    fields: RwLock<HashMap<String, String>>,
}

impl MemoryCarrier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionCarrier for MemoryCarrier {
    fn read_fields(&self) -> Result<HashMap<String, String>, CarrierError> {
        Ok(self.fields.read().clone())
    }

    fn write_fields(
        &self,
        fields: HashMap<String, String>,
        expire_all_immediately: bool,
    ) -> Result<(), CarrierError> {
        let mut guard = self.fields.write();
        if expire_all_immediately {
            guard.clear();
            return Ok(());
        }
        for (name, value) in fields {
            if value.is_empty() {
                guard.remove(&name);
            } else {
                guard.insert(name, value);
            }
        }
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{GatewayError, GatewayResult};
use crate::session::carrier::SessionCarrier;
use crate::session::types::{FIELD_ACCESS_TOKEN, FIELD_ACCESS_TOKEN_EXPIRY, Session};

/// Owns the persisted token pair for one logical user session.
///
/// All reads and writes go through the injected carrier; a failed carrier
/// write surfaces as [`GatewayError::Persistence`].
#[derive(Clone)]
pub struct TokenStore {
    carrier: Arc<dyn SessionCarrier>,
}

impl TokenStore {
    pub fn new(carrier: Arc<dyn SessionCarrier>) -> Self {
        Self { carrier }
    }

    pub fn get(&self) -> GatewayResult<Option<Session>> {
        let fields = self.carrier.read_fields()?;
        Ok(Session::from_fields(&fields))
    }

    pub fn set(&self, session: &Session) -> GatewayResult<()> {
        if !session.access_token.is_empty() && session.access_token_expires_at.is_none() {
            return Err(GatewayError::Config(
                "access token stored without an expiry".into(),
            ));
        }
        if session.refresh_token.is_empty() {
            return Err(GatewayError::Config(
                "session stored without a refresh token".into(),
            ));
        }
        self.carrier.write_fields(session.to_fields(), false)?;
        Ok(())
    }

    /// Destroy the session: every field zeroed with immediate expiry.
    pub fn clear(&self) -> GatewayResult<()> {
        self.carrier.write_fields(Session::cleared_fields(), true)?;
        Ok(())
    }

    /// Drop only the access token (ahead of a forced refresh), keeping the
    /// refresh token and identity in place.
    pub fn clear_access_token(&self) -> GatewayResult<()> {
        let mut fields = HashMap::new();
        fields.insert(FIELD_ACCESS_TOKEN.to_string(), String::new());
        fields.insert(FIELD_ACCESS_TOKEN_EXPIRY.to_string(), String::new());
        self.carrier.write_fields(fields, false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::carrier::{CarrierError, MemoryCarrier};
    use chrono::{Duration, Utc};

    fn sample_session() -> Session {
        Session {
            user_email: "user@example.com".into(),
            access_token: "tok".into(),
            access_token_expires_at: Some(Utc::now() + Duration::seconds(3600)),
            refresh_token: "ref".into(),
        }
    }

    #[test]
    fn set_then_get_roundtrips() {
        let store = TokenStore::new(Arc::new(MemoryCarrier::new()));
        let session = sample_session();
        store.set(&session).unwrap();

        let loaded = store.get().unwrap().expect("session present");
        assert_eq!(loaded.access_token, "tok");
        assert_eq!(loaded.refresh_token, "ref");
    }

    #[test]
    fn clear_destroys_the_session() {
        let store = TokenStore::new(Arc::new(MemoryCarrier::new()));
        store.set(&sample_session()).unwrap();
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn clear_access_token_keeps_the_refresh_token() {
        let store = TokenStore::new(Arc::new(MemoryCarrier::new()));
        store.set(&sample_session()).unwrap();
        store.clear_access_token().unwrap();

        let loaded = store.get().unwrap().expect("session still present");
        assert!(loaded.access_token.is_empty());
        assert!(loaded.access_token_expires_at.is_none());
        assert_eq!(loaded.refresh_token, "ref");
    }

    #[test]
    fn token_without_expiry_is_rejected() {
        let store = TokenStore::new(Arc::new(MemoryCarrier::new()));
        let mut session = sample_session();
        session.access_token_expires_at = None;
        assert!(matches!(
            store.set(&session),
            Err(GatewayError::Config(_))
        ));
    }

    struct FailingCarrier;

    impl SessionCarrier for FailingCarrier {
        fn read_fields(&self) -> Result<HashMap<String, String>, CarrierError> {
            Ok(HashMap::new())
        }

        fn write_fields(
            &self,
            _fields: HashMap<String, String>,
            _expire_all_immediately: bool,
        ) -> Result<(), CarrierError> {
            Err(CarrierError("disk full".into()))
        }
    }

    #[test]
    fn carrier_write_failure_surfaces_as_persistence() {
        let store = TokenStore::new(Arc::new(FailingCarrier));
        assert!(matches!(
            store.set(&sample_session()),
            Err(GatewayError::Persistence(_))
        ));
    }
}

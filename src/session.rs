//! Process-local session state for one client instance.
//!
//! The session is an explicit value owned by the client and consulted by
//! every operation — there is no module-global token. A login populates it
//! in order (token, then organization, then connection); nothing here
//! survives the process.

use crate::error::{ClientError, ClientResult};

/// Access token, organization id, and storage-connection id for one
/// authenticated client.
///
/// All three start unset. Accessors fail with
/// [`ClientError::Precondition`] until the corresponding field has been
/// resolved, which is what lets client methods fail fast instead of issuing
/// malformed requests.
#[derive(Debug, Clone, Default)]
pub struct Session {
    access_token: Option<String>,
    org_id: Option<String>,
    connection_id: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bearer token, or a precondition error if not logged in.
    pub fn token(&self) -> ClientResult<&str> {
        self.access_token
            .as_deref()
            .ok_or_else(|| ClientError::precondition("access token"))
    }

    /// The organization id, or a precondition error if unresolved.
    pub fn org(&self) -> ClientResult<&str> {
        self.org_id
            .as_deref()
            .ok_or_else(|| ClientError::precondition("organization id"))
    }

    /// The storage-connection id, or a precondition error if unresolved.
    pub fn connection(&self) -> ClientResult<&str> {
        self.connection_id
            .as_deref()
            .ok_or_else(|| ClientError::precondition("connection id"))
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn has_org(&self) -> bool {
        self.org_id.is_some()
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
    }

    pub fn set_org(&mut self, org_id: impl Into<String>) {
        self.org_id = Some(org_id.into());
    }

    pub fn set_connection(&mut self, connection_id: impl Into<String>) {
        self.connection_id = Some(connection_id.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_fails_every_accessor() {
        let s = Session::new();
        assert!(matches!(
            s.token(),
            Err(ClientError::Precondition { field: "access token" })
        ));
        assert!(matches!(
            s.org(),
            Err(ClientError::Precondition { field: "organization id" })
        ));
        assert!(matches!(
            s.connection(),
            Err(ClientError::Precondition { field: "connection id" })
        ));
        assert!(!s.is_authenticated());
    }

    #[test]
    fn resolved_fields_are_returned() {
        let mut s = Session::new();
        s.set_token("tok");
        s.set_org("org-1");
        s.set_connection("conn-1");
        assert_eq!(s.token().unwrap(), "tok");
        assert_eq!(s.org().unwrap(), "org-1");
        assert_eq!(s.connection().unwrap(), "conn-1");
        assert!(s.is_authenticated());
    }
}

//! CMS remote-procedure abstraction.
//!
//! The [`CmsRpc`] trait is the only surface the gateway depends on: the four
//! primitives an Odoo-style CMS exposes over JSON-RPC. Two backends exist:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`odoo::OdooJsonRpc`] | a real Odoo server at `{url}/jsonrpc` |
//! | [`memory::InMemoryCms`] | dry runs and tests |
//!
//! Implementations must be `Send + Sync`: one client is shared by every
//! concurrent item worker.

pub mod memory;
pub mod odoo;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;

/// A CMS record as returned by `search_read`: field name → value.
pub type Record = Map<String, Value>;

/// Login material for [`CmsRpc::authenticate`].
#[derive(Clone)]
pub struct Credentials {
    pub db: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        db: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            db: db.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("db", &self.db)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// An authenticated session. Immutable once issued and shared read-only by
/// every upsert of the run.
#[derive(Clone)]
pub struct Session {
    pub uid: i64,
    pub db: String,
    /// Object calls re-send the password alongside the uid.
    pub password: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uid", &self.uid)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

/// A conjunction of `field = value` conditions.
///
/// Serialises to the CMS domain syntax: `[["ref", "=", "swapi:people:1"]]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain {
    terms: Vec<(String, Value)>,
}

impl Domain {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((field.into(), value.into()));
        self
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.terms
                .iter()
                .map(|(field, value)| serde_json::json!([field, "=", value]))
                .collect(),
        )
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.terms
            .iter()
            .all(|(field, value)| record.get(field) == Some(value))
    }
}

/// The four CMS primitives the sync needs.
#[async_trait]
pub trait CmsRpc: Send + Sync {
    /// Log in and return a session. Rejected credentials are an error.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session>;

    /// Return the records of `model` matching `domain`, projected to `fields`
    /// (the `id` field is always included).
    async fn search_read(
        &self,
        session: &Session,
        model: &str,
        domain: &Domain,
        fields: &[&str],
    ) -> Result<Vec<Record>>;

    /// Create one record and return its id.
    async fn create(&self, session: &Session, model: &str, values: &Record) -> Result<i64>;

    /// Update the given records in place.
    async fn write(
        &self,
        session: &Session,
        model: &str,
        ids: &[i64],
        values: &Record,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn domain_serialises_to_cms_syntax() {
        let domain = Domain::eq("x_external_key", "swapi:people:1").and_eq("active", true);
        assert_eq!(
            domain.to_json(),
            json!([["x_external_key", "=", "swapi:people:1"], ["active", "=", true]])
        );
    }

    #[test]
    fn domain_matches_all_terms() {
        let domain = Domain::eq("x_external_key", "swapi:people:1");
        let hit = json!({"id": 1, "x_external_key": "swapi:people:1"});
        let miss = json!({"id": 2, "x_external_key": "swapi:people:2"});
        assert!(domain.matches(hit.as_object().unwrap()));
        assert!(!domain.matches(miss.as_object().unwrap()));
    }

    #[test]
    fn debug_output_hides_passwords() {
        let creds = Credentials::new("odoo", "admin", "hunter2");
        let session = Session {
            uid: 2,
            db: "odoo".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
        assert!(!format!("{:?}", session).contains("hunter2"));
    }
}

//! Idempotent create-or-update against the CMS.
//!
//! A record is located by its external key, stored in a dedicated key field
//! on every model (`x_external_key` unless configured otherwise):
//!
//! 1. `search_read` on `[[key_field, "=", external_key]]`.
//! 2. No match → `create` → [`UpsertOutcome::Created`].
//! 3. One match → `write` in place → [`UpsertOutcome::Updated`].
//! 4. More than one → [`UpsertOutcome::Failed`] with `DataIntegrity`.
//!
//! Failures never escape [`TargetGateway::upsert`]; they become that item's
//! outcome.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::models::{TargetRecord, UpsertOutcome};
use crate::rpc::{CmsRpc, Credentials, Domain, Session};

pub struct TargetGateway {
    rpc: Arc<dyn CmsRpc>,
    key_field: String,
}

impl TargetGateway {
    pub fn new(rpc: Arc<dyn CmsRpc>, key_field: impl Into<String>) -> Self {
        Self {
            rpc,
            key_field: key_field.into(),
        }
    }

    /// Log in once for the run. Any failure is reported as `AuthFailed`.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Session> {
        match self.rpc.authenticate(credentials).await {
            Ok(session) => {
                info!(uid = session.uid, db = %session.db, "authenticated");
                Ok(session)
            }
            Err(SyncError::AuthFailed(msg)) => Err(SyncError::AuthFailed(msg)),
            Err(other) => Err(SyncError::AuthFailed(other.to_string())),
        }
    }

    /// Create or update `record`, keyed by its external key.
    pub async fn upsert(&self, session: &Session, record: &TargetRecord) -> UpsertOutcome {
        match self.try_upsert(session, record).await {
            Ok(outcome) => outcome,
            Err(e) => UpsertOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }

    async fn try_upsert(&self, session: &Session, record: &TargetRecord) -> Result<UpsertOutcome> {
        let domain = Domain::eq(&self.key_field, record.external_key.as_str());
        let existing = self
            .rpc
            .search_read(session, &record.model, &domain, &["id"])
            .await?;

        let mut values = record.values.clone();
        values.insert(
            self.key_field.clone(),
            Value::String(record.external_key.clone()),
        );

        match existing.as_slice() {
            [] => {
                let id = self.rpc.create(session, &record.model, &values).await?;
                debug!(model = %record.model, key = %record.external_key, id, "created");
                Ok(UpsertOutcome::Created { id })
            }
            [found] => {
                let id = found.get("id").and_then(Value::as_i64).ok_or_else(|| {
                    SyncError::Rpc(format!(
                        "{} match for {} has no id",
                        record.model, record.external_key
                    ))
                })?;
                self.rpc.write(session, &record.model, &[id], &values).await?;
                debug!(model = %record.model, key = %record.external_key, id, "updated");
                Ok(UpsertOutcome::Updated { id })
            }
            many => Err(SyncError::DataIntegrity {
                model: record.model.clone(),
                external_key: record.external_key.clone(),
                count: many.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::rpc::memory::InMemoryCms;
    use serde_json::json;

    fn record(key: &str, name: &str) -> TargetRecord {
        TargetRecord {
            model: "res.planet".into(),
            external_key: key.into(),
            values: json!({ "name": name }).as_object().unwrap().clone(),
        }
    }

    async fn setup() -> (Arc<InMemoryCms>, TargetGateway, Session) {
        let cms = Arc::new(InMemoryCms::new());
        let gateway = TargetGateway::new(cms.clone(), "x_external_key");
        let session = gateway
            .authenticate(&Credentials::new("db", "admin", "admin"))
            .await
            .unwrap();
        (cms, gateway, session)
    }

    #[tokio::test]
    async fn creates_then_updates() {
        let (cms, gateway, session) = setup().await;

        let first = gateway.upsert(&session, &record("swapi:planets:1", "Tatooine")).await;
        let id = match first {
            UpsertOutcome::Created { id } => id,
            other => panic!("expected Created, got {:?}", other),
        };

        let second = gateway
            .upsert(&session, &record("swapi:planets:1", "Tatooine (updated)"))
            .await;
        assert_eq!(second, UpsertOutcome::Updated { id });

        let stored = cms
            .find("res.planet", "x_external_key", "swapi:planets:1")
            .unwrap();
        assert_eq!(stored["name"], json!("Tatooine (updated)"));
        assert_eq!(cms.records("res.planet").len(), 1);
    }

    #[tokio::test]
    async fn duplicate_keys_are_a_data_integrity_failure() {
        let (cms, gateway, session) = setup().await;
        let dup = json!({"x_external_key": "swapi:planets:2", "name": "Alderaan"});
        for _ in 0..2 {
            cms.create(&session, "res.planet", dup.as_object().unwrap())
                .await
                .unwrap();
        }

        let outcome = gateway.upsert(&session, &record("swapi:planets:2", "Alderaan")).await;
        match outcome {
            UpsertOutcome::Failed { kind, message } => {
                assert_eq!(kind, ErrorKind::DataIntegrity);
                assert!(message.contains("swapi:planets:2"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_credentials_become_auth_failed() {
        let cms = Arc::new(InMemoryCms::with_user("admin", "secret"));
        let gateway = TargetGateway::new(cms, "x_external_key");
        let err = gateway
            .authenticate(&Credentials::new("db", "admin", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }
}

//! In-memory [`CmsRpc`] implementation for dry runs and tests.
//!
//! Records live in a `HashMap` of models behind `std::sync::RwLock`. Ids are
//! allocated from one counter shared by all models, starting at 1.
//! `create` does not enforce key uniqueness, so duplicate keys can be seeded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::{CmsRpc, Credentials, Domain, Record, Session};
use crate::error::{Result, SyncError};

/// In-memory CMS.
pub struct InMemoryCms {
    models: RwLock<HashMap<String, Vec<Record>>>,
    next_id: AtomicI64,
    /// `(username, password)`; `None` accepts any login.
    user: Option<(String, String)>,
}

impl InMemoryCms {
    /// A CMS that accepts any credentials.
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            user: None,
        }
    }

    /// A CMS that only accepts the given login.
    pub fn with_user(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: Some((username.into(), password.into())),
            ..Self::new()
        }
    }

    /// Snapshot of every record in `model`, in creation order.
    pub fn records(&self, model: &str) -> Vec<Record> {
        self.models
            .read()
            .map(|models| models.get(model).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Record in `model` whose `field` equals `value`, if exactly one exists.
    pub fn find(&self, model: &str, field: &str, value: &str) -> Option<Record> {
        let domain = Domain::eq(field, value);
        let mut hits = self
            .records(model)
            .into_iter()
            .filter(|r| domain.matches(r));
        let first = hits.next()?;
        hits.next().is_none().then_some(first)
    }
}

impl Default for InMemoryCms {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> SyncError {
    SyncError::Rpc("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl CmsRpc for InMemoryCms {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session> {
        if let Some((username, password)) = &self.user {
            if *username != credentials.username || *password != credentials.password {
                return Err(SyncError::AuthFailed(format!(
                    "invalid credentials for {}@{}",
                    credentials.username, credentials.db
                )));
            }
        }
        Ok(Session {
            uid: 1,
            db: credentials.db.clone(),
            password: credentials.password.clone(),
        })
    }

    async fn search_read(
        &self,
        _session: &Session,
        model: &str,
        domain: &Domain,
        fields: &[&str],
    ) -> Result<Vec<Record>> {
        let models = self.models.read().map_err(|_| poisoned())?;
        let Some(records) = models.get(model) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|r| domain.matches(r))
            .map(|r| {
                r.iter()
                    .filter(|(k, _)| k.as_str() == "id" || fields.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .collect())
    }

    async fn create(&self, _session: &Session, model: &str, values: &Record) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut record = values.clone();
        record.insert("id".to_string(), Value::from(id));
        self.models
            .write()
            .map_err(|_| poisoned())?
            .entry(model.to_string())
            .or_default()
            .push(record);
        Ok(id)
    }

    async fn write(
        &self,
        _session: &Session,
        model: &str,
        ids: &[i64],
        values: &Record,
    ) -> Result<()> {
        let mut models = self.models.write().map_err(|_| poisoned())?;
        let records = models
            .get_mut(model)
            .ok_or_else(|| SyncError::Rpc(format!("unknown model {}", model)))?;
        for id in ids {
            let record = records
                .iter_mut()
                .find(|r| r.get("id").and_then(Value::as_i64) == Some(*id))
                .ok_or_else(|| SyncError::Rpc(format!("{} record {} does not exist", model, id)))?;
            for (k, v) in values {
                if k != "id" {
                    record.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }
}

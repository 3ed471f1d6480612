//! Odoo JSON-RPC client.
//!
//! Every call is a `POST {url}/jsonrpc` with the envelope
//!
//! ```json
//! { "jsonrpc": "2.0", "method": "call",
//!   "params": { "service": "object", "method": "execute_kw", "args": [...] },
//!   "id": 7 }
//! ```
//!
//! Login uses `common.login(db, username, password)`, which returns the uid or
//! `false`. Model calls use `object.execute_kw(db, uid, password, model,
//! method, args, kwargs)`. A reply carrying `error` is surfaced as
//! [`SyncError::Rpc`] with the server's message.
//!
//! In-flight calls are bounded by a semaphore so a wide worker pool cannot
//! flood the server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::debug;

use super::{CmsRpc, Credentials, Domain, Record, Session};
use crate::config::OdooConfig;
use crate::error::{Result, SyncError};

pub struct OdooJsonRpc {
    endpoint: String,
    client: reqwest::Client,
    permits: Semaphore,
    next_id: AtomicU64,
}

impl OdooJsonRpc {
    pub fn new(config: &OdooConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: format!("{}/jsonrpc", config.url.trim_end_matches('/')),
            client,
            permits: Semaphore::new(config.max_in_flight.max(1)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SyncError::Rpc("rpc client is shut down".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": id,
        });

        debug!(service, method, id, "odoo rpc");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Rpc(format!("{} unreachable: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::Rpc(format!(
                "HTTP {} from {}: {}",
                status,
                self.endpoint,
                crate::http::truncate(&text)
            )));
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| SyncError::Rpc(format!("invalid JSON-RPC reply: {}", e)))?;

        parse_reply(reply)
    }

    async fn execute_kw(
        &self,
        session: &Session,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Value,
    ) -> Result<Value> {
        self.call(
            "object",
            "execute_kw",
            json!([session.db, session.uid, session.password, model, method, args, kwargs]),
        )
        .await
    }
}

/// Extract `result` from a JSON-RPC reply, or turn `error` into [`SyncError::Rpc`].
fn parse_reply(mut reply: Value) -> Result<Value> {
    if let Some(err) = reply.get("error").filter(|e| !e.is_null()) {
        return Err(SyncError::Rpc(error_message(err)));
    }
    match reply.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(SyncError::Rpc(
            "JSON-RPC reply has neither result nor error".to_string(),
        )),
    }
}

/// Odoo nests the useful text under `error.data.message`.
fn error_message(err: &Value) -> String {
    err.pointer("/data/message")
        .and_then(Value::as_str)
        .or_else(|| err.get("message").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string())
}

/// `create` answers with an id, or a one-element list for list input.
fn parse_created_id(result: &Value) -> Result<i64> {
    result
        .as_i64()
        .or_else(|| result.as_array().and_then(|a| a.first()).and_then(Value::as_i64))
        .ok_or_else(|| SyncError::Rpc(format!("create returned no id: {}", result)))
}

#[async_trait]
impl CmsRpc for OdooJsonRpc {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session> {
        let result = self
            .call(
                "common",
                "login",
                json!([credentials.db, credentials.username, credentials.password]),
            )
            .await
            .map_err(|e| SyncError::AuthFailed(e.to_string()))?;

        match result.as_i64() {
            Some(uid) => Ok(Session {
                uid,
                db: credentials.db.clone(),
                password: credentials.password.clone(),
            }),
            None => Err(SyncError::AuthFailed(format!(
                "invalid credentials for {}@{}",
                credentials.username, credentials.db
            ))),
        }
    }

    async fn search_read(
        &self,
        session: &Session,
        model: &str,
        domain: &Domain,
        fields: &[&str],
    ) -> Result<Vec<Record>> {
        let result = self
            .execute_kw(
                session,
                model,
                "search_read",
                json!([domain.to_json()]),
                json!({ "fields": fields }),
            )
            .await?;

        let rows = result
            .as_array()
            .ok_or_else(|| SyncError::Rpc(format!("search_read returned {}", result)))?;
        rows.iter()
            .map(|row| {
                row.as_object()
                    .cloned()
                    .ok_or_else(|| SyncError::Rpc(format!("search_read row is not an object: {}", row)))
            })
            .collect()
    }

    async fn create(&self, session: &Session, model: &str, values: &Record) -> Result<i64> {
        let result = self
            .execute_kw(session, model, "create", json!([values]), json!({}))
            .await?;
        parse_created_id(&result)
    }

    async fn write(
        &self,
        session: &Session,
        model: &str,
        ids: &[i64],
        values: &Record,
    ) -> Result<()> {
        let result = self
            .execute_kw(session, model, "write", json!([ids, values]), json!({}))
            .await?;
        if result.as_bool() == Some(false) {
            return Err(SyncError::Rpc(format!("write on {} {:?} returned false", model, ids)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_error_prefers_data_message() {
        let reply = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {
                "code": 200,
                "message": "Odoo Server Error",
                "data": { "name": "odoo.exceptions.AccessError", "message": "Access denied" }
            }
        });
        let err = parse_reply(reply).unwrap_err();
        assert_eq!(err.to_string(), "rpc error: Access denied");
    }

    #[test]
    fn reply_result_is_extracted() {
        let reply = json!({"jsonrpc": "2.0", "id": 1, "result": [1, 2]});
        assert_eq!(parse_reply(reply).unwrap(), json!([1, 2]));
    }

    #[test]
    fn reply_without_result_is_an_error() {
        assert!(parse_reply(json!({"jsonrpc": "2.0", "id": 1})).is_err());
    }

    #[test]
    fn created_id_accepts_int_or_list() {
        assert_eq!(parse_created_id(&json!(42)).unwrap(), 42);
        assert_eq!(parse_created_id(&json!([42])).unwrap(), 42);
        assert!(parse_created_id(&json!(false)).is_err());
    }
}

//! D-Bus surface for the Reunite daemon.
//!
//! Bus name: org.reunite.Registry1
//! Object path: /org/reunite/Registry1
//!
//! The HTTP gateway consumed by field clients is a separate service;
//! it talks to this interface. Payloads cross the bus as JSON strings.

use crate::auth::SessionManager;
use crate::engine::{ScanEngine, ScanError};
use reunite_store::{CaseStore, NewCase};
use std::sync::Arc;
use zbus::interface;

pub struct RegistryService {
    engine: Arc<ScanEngine>,
    sessions: Arc<SessionManager>,
    store: CaseStore,
}

impl RegistryService {
    pub fn new(engine: Arc<ScanEngine>, sessions: Arc<SessionManager>, store: CaseStore) -> Self {
        Self {
            engine,
            sessions,
            store,
        }
    }

    async fn require_session(&self, token: &str) -> zbus::fdo::Result<()> {
        match self.sessions.principal(token).await {
            Some(_) => Ok(()),
            None => Err(zbus::fdo::Error::AccessDenied(
                ScanError::Unauthorized.to_string(),
            )),
        }
    }
}

/// Map a scan failure onto the bus error it surfaces as. Storage
/// details stay in the log; callers get a short actionable message.
fn map_scan_error(err: ScanError) -> zbus::fdo::Error {
    match err {
        ScanError::Unauthorized => zbus::fdo::Error::AccessDenied(err.to_string()),
        ScanError::Store(ref source) => {
            tracing::error!(error = %source, "storage failure during request");
            zbus::fdo::Error::Failed("case registry unavailable — try again shortly".into())
        }
        ScanError::ExtractionBackend(ref reason) => {
            tracing::error!(%reason, "extraction backend failure");
            zbus::fdo::Error::Failed(err.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

#[interface(name = "org.reunite.Registry1")]
impl RegistryService {
    /// Open an officer session; returns the session token.
    async fn login(&self, username: &str, password: &str) -> zbus::fdo::Result<String> {
        match self.store.verify_officer(username, password).await {
            Ok(Some(officer)) => {
                tracing::info!(username, "officer logged in");
                Ok(self.sessions.open_session(officer).await)
            }
            Ok(None) => {
                tracing::warn!(username, "rejected login");
                Err(zbus::fdo::Error::AccessDenied(
                    "invalid username or password".into(),
                ))
            }
            Err(err) => {
                tracing::error!(error = %err, "credential lookup failed");
                Err(zbus::fdo::Error::Failed(
                    "credential store unavailable".into(),
                ))
            }
        }
    }

    /// Close an officer session.
    async fn logout(&self, token: &str) -> zbus::fdo::Result<bool> {
        Ok(self.sessions.close_session(token).await)
    }

    /// Match a base64-encoded frame against the registry.
    ///
    /// Returns `{"results": [{case_id, name, distance, matched,
    /// complainant_phone?}, ...]}` ranked by ascending distance.
    async fn scan_frame(&self, token: &str, frame_b64: &str) -> zbus::fdo::Result<String> {
        match self.engine.scan_frame(token, frame_b64).await {
            Ok(results) => Ok(serde_json::json!({ "results": results }).to_string()),
            Err(err) => Err(map_scan_error(err)),
        }
    }

    /// File a missing-person report. `details_json` carries the case
    /// fields; the photo travels base64-encoded. Returns the case id.
    async fn submit_report(&self, details_json: &str, image_b64: &str) -> zbus::fdo::Result<i64> {
        let fields: NewCase = serde_json::from_str(details_json).map_err(|e| {
            zbus::fdo::Error::InvalidArgs(format!("malformed report details: {e}"))
        })?;
        if fields.missing_full_name.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "missing_full_name is required".into(),
            ));
        }
        self.engine
            .submit_report(fields, image_b64)
            .await
            .map_err(map_scan_error)
    }

    /// Hard-delete a case. In-flight scans keep their snapshot.
    async fn delete_case(&self, token: &str, case_id: i64) -> zbus::fdo::Result<bool> {
        self.require_session(token).await?;
        let deleted = self
            .store
            .delete_case(case_id)
            .await
            .map_err(|e| map_scan_error(e.into()))?;
        tracing::info!(case_id, deleted, "case deletion requested");
        Ok(deleted)
    }

    /// Most recent cases as `{"cases": [...]}`, embeddings elided.
    async fn list_cases(&self, token: &str, limit: u32) -> zbus::fdo::Result<String> {
        self.require_session(token).await?;
        let cases = self
            .store
            .recent_cases(limit.clamp(1, 200))
            .await
            .map_err(|e| map_scan_error(e.into()))?;
        Ok(serde_json::json!({ "cases": cases }).to_string())
    }

    /// Attach embeddings to cases still missing one, from their stored
    /// photos. Returns `{"processed": n, "failed": m}`.
    async fn reembed_pending(&self, token: &str) -> zbus::fdo::Result<String> {
        self.require_session(token).await?;
        let summary = self
            .engine
            .reembed_pending()
            .await
            .map_err(map_scan_error)?;
        Ok(serde_json::to_string(&summary).expect("summary serializes"))
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let registry_size = self.store.registry_size().await.unwrap_or(-1);
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "registry_size": registry_size,
        })
        .to_string())
    }
}

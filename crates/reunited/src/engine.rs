//! Scan engine: the per-request pipeline and the shared inference thread.
//!
//! One scan runs Received → Decoded → Embedded → Matched → Responded in
//! strict sequence; alert dispatch detaches at Matched and never gates
//! the response. ONNX sessions live on a dedicated OS thread and are
//! driven through an mpsc/oneshot handle, so concurrent scans serialize
//! only on inference.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use reunite_alert::{AlertDispatcher, AlertPolicy};
use reunite_core::{
    rank_candidates, Embedding, EmbeddingProvider, ExtractError, ExtractionPipeline, MatchResult,
    MatchThresholds,
};
use reunite_store::{stored_image_name, CaseStore, NewCase, StoreError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::auth::SessionManager;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("unauthorized — log in and try again")]
    Unauthorized,
    #[error("could not decode the submitted frame — retake the photo and try again")]
    DecodeFailed,
    #[error("no face detected — ensure good lighting and face the camera")]
    NoFaceDetected,
    #[error("face analysis backend failed — try again shortly")]
    ExtractionBackend(String),
    #[error("no cases with embeddings to compare against")]
    EmptyRegistry,
    #[error("could not store the uploaded photo")]
    Upload(String),
    #[error("scan engine unavailable")]
    InferenceUnavailable,
    #[error("storage error")]
    Store(#[from] StoreError),
}

enum InferenceRequest {
    Extract {
        image: DynamicImage,
        reply: oneshot::Sender<Result<Embedding, ExtractError>>,
    },
}

/// Clone-safe handle to the inference thread.
#[derive(Clone)]
pub struct InferenceHandle {
    tx: mpsc::Sender<InferenceRequest>,
}

impl InferenceHandle {
    /// Run the extraction fallback chain on the inference thread.
    pub async fn extract(&self, image: DynamicImage) -> Result<Embedding, ScanError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(InferenceRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ScanError::InferenceUnavailable)?;
        let result = reply_rx.await.map_err(|_| ScanError::InferenceUnavailable)?;
        result.map_err(|e| match e {
            ExtractError::NoFace => ScanError::NoFaceDetected,
            ExtractError::Backend(reason) => ScanError::ExtractionBackend(reason),
        })
    }
}

/// Spawn the inference loop on a dedicated OS thread.
///
/// The thread owns the provider's sessions mutably; requests serialize
/// through a small channel.
pub fn spawn_inference<P>(provider: P, pipeline: ExtractionPipeline) -> InferenceHandle
where
    P: EmbeddingProvider + 'static,
{
    let (tx, mut rx) = mpsc::channel::<InferenceRequest>(4);

    std::thread::Builder::new()
        .name("reunite-inference".into())
        .spawn(move || {
            let mut provider = provider;
            tracing::info!("inference thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    InferenceRequest::Extract { image, reply } => {
                        let _ = reply.send(pipeline.extract(&mut provider, &image));
                    }
                }
            }
            tracing::info!("inference thread exiting");
        })
        .expect("failed to spawn inference thread");

    InferenceHandle { tx }
}

#[derive(Debug, Serialize)]
pub struct ReembedSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Shared scan pipeline: one instance serves every request.
pub struct ScanEngine {
    store: CaseStore,
    inference: InferenceHandle,
    dispatcher: AlertDispatcher,
    sessions: Arc<SessionManager>,
    thresholds: MatchThresholds,
    policy: AlertPolicy,
    scan_location: String,
    officer_contact: String,
    upload_dir: PathBuf,
}

impl ScanEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: CaseStore,
        inference: InferenceHandle,
        dispatcher: AlertDispatcher,
        sessions: Arc<SessionManager>,
        thresholds: MatchThresholds,
        policy: AlertPolicy,
        scan_location: String,
        officer_contact: String,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            inference,
            dispatcher,
            sessions,
            thresholds,
            policy,
            scan_location,
            officer_contact,
            upload_dir,
        }
    }

    /// Match one camera frame against the registry.
    ///
    /// Authorization runs first and unconditionally. The ranked results
    /// go back to the caller as soon as matching finishes; eligible
    /// alerts are already queued by then and deliver on their own time.
    pub async fn scan_frame(
        &self,
        token: &str,
        frame_b64: &str,
    ) -> Result<Vec<MatchResult>, ScanError> {
        let Some(officer) = self.sessions.principal(token).await else {
            return Err(ScanError::Unauthorized);
        };

        let image = decode_frame(frame_b64)?;
        let probe = self.inference.extract(image).await?;

        let snapshot = self.store.snapshot().await?;
        let candidates = snapshot.len();
        let ranked =
            rank_candidates(&probe, &snapshot, &self.thresholds).map_err(|_| ScanError::EmptyRegistry)?;

        let officer_contact = officer
            .contact_phone
            .clone()
            .unwrap_or_else(|| self.officer_contact.clone());
        let alerts_queued =
            self.dispatcher
                .dispatch_match_alerts(&ranked, &self.policy, &self.scan_location, &officer_contact);

        tracing::info!(
            officer = %officer.username,
            candidates,
            results = ranked.len(),
            alerts_queued,
            "scan complete"
        );
        Ok(ranked)
    }

    /// File a new missing-person report.
    ///
    /// The photo is stored first; embedding extraction is best-effort
    /// and a failure only leaves the case unprocessed for the re-embed
    /// job. A confirmation is queued when the complainant left a phone.
    pub async fn submit_report(
        &self,
        mut fields: NewCase,
        image_b64: &str,
    ) -> Result<i64, ScanError> {
        let bytes = decode_b64(image_b64).ok_or(ScanError::DecodeFailed)?;

        let ext = image::guess_format(&bytes)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("jpg");
        let filename = stored_image_name(ext);

        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|e| ScanError::Upload(e.to_string()))?;
        tokio::fs::write(self.upload_dir.join(&filename), &bytes)
            .await
            .map_err(|e| ScanError::Upload(e.to_string()))?;

        let embedding = match image::load_from_memory(&bytes) {
            Ok(image) => match self.inference.extract(image).await {
                Ok(embedding) => Some(embedding),
                Err(err) => {
                    tracing::warn!(error = %err, "report embedding failed; case left unprocessed");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "uploaded photo not decodable; case left unprocessed");
                None
            }
        };

        fields.image_path = filename;
        let case_id = self.store.insert_case(&fields, embedding.as_ref()).await?;

        if let Some(phone) = fields
            .complainant_phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            let complainant = fields
                .complainant_name
                .clone()
                .unwrap_or_else(|| "Complainant".to_string());
            self.dispatcher
                .confirm_report(case_id, phone, &complainant, &fields.missing_full_name);
        }

        tracing::info!(case_id, embedded = embedding.is_some(), "report registered");
        Ok(case_id)
    }

    /// Attach embeddings to every unprocessed case from its stored photo.
    pub async fn reembed_pending(&self) -> Result<ReembedSummary, ScanError> {
        let pending = self.store.unprocessed().await?;
        let mut summary = ReembedSummary {
            processed: 0,
            failed: 0,
        };

        for case in pending {
            let path = self.upload_dir.join(&case.image_path);
            let outcome: Result<(), String> = async {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| format!("read {}: {e}", path.display()))?;
                let image = image::load_from_memory(&bytes).map_err(|e| e.to_string())?;
                let embedding = self
                    .inference
                    .extract(image)
                    .await
                    .map_err(|e| e.to_string())?;
                self.store
                    .attach_embedding(case.id, &embedding)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(())
            }
            .await;

            match outcome {
                Ok(()) => {
                    summary.processed += 1;
                    tracing::info!(case_id = case.id, name = %case.name, "embedding attached");
                }
                Err(error) => {
                    summary.failed += 1;
                    tracing::warn!(case_id = case.id, name = %case.name, error, "re-embed failed");
                }
            }
        }
        Ok(summary)
    }
}

fn decode_b64(payload: &str) -> Option<Vec<u8>> {
    let trimmed = payload.trim();
    // Browsers send data URLs; accept both forms.
    let raw = trimmed
        .split_once("base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    BASE64.decode(raw).ok()
}

fn decode_frame(frame_b64: &str) -> Result<DynamicImage, ScanError> {
    let bytes = decode_b64(frame_b64).ok_or(ScanError::DecodeFailed)?;
    image::load_from_memory(&bytes).map_err(|_| ScanError::DecodeFailed)
}

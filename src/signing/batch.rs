//! Signing many documents of one type in a single request.

use std::sync::Arc;

use crate::commons::DocsignResult;
use crate::commons::api::{
    BatchItemResult, BatchSignResponse, DocumentId, DocumentType,
};
use crate::commons::error::Error;
use crate::ledger::SignatureLedger;
use crate::session::Session;
use crate::signing::orchestrator::SigningOrchestrator;
use crate::signing::progress::{operator_topic, ProgressChannel, ProgressEvent};


//------------ BatchCoordinator ----------------------------------------------

/// Signs a list of documents one after the other using a single session.
///
/// Items are independent: a failure is reported in the item's result and
/// the batch carries on with the next document. A progress event is
/// published after each item and once more when the batch is done.
pub struct BatchCoordinator {
    orchestrator: Arc<SigningOrchestrator>,
    ledger: Arc<SignatureLedger>,
    progress: Arc<dyn ProgressChannel>,
    max_batch_size: usize,
    location: String,
}

impl BatchCoordinator {
    pub fn new(
        orchestrator: Arc<SigningOrchestrator>,
        ledger: Arc<SignatureLedger>,
        progress: Arc<dyn ProgressChannel>,
        max_batch_size: usize,
        location: String,
    ) -> Self {
        BatchCoordinator { orchestrator, ledger, progress, max_batch_size, location }
    }

    pub fn check_batch_size(&self, size: usize) -> DocsignResult<()> {
        if size > self.max_batch_size {
            return Err(Error::BatchTooLarge { size, max: self.max_batch_size });
        }
        Ok(())
    }

    pub async fn sign_batch(
        &self,
        session: &Arc<Session>,
        document_ids: &[DocumentId],
        document_type: &DocumentType,
        reason: &str,
    ) -> DocsignResult<BatchSignResponse> {
        self.check_batch_size(document_ids.len())?;

        let total = document_ids.len();
        let topic = operator_topic(session.operator());
        let mut results = Vec::with_capacity(total);

        info!(
            "Signing batch of {} {} document(s) for '{}'",
            total,
            document_type,
            session.operator()
        );

        for (idx, document_id) in document_ids.iter().enumerate() {
            let result = self.sign_item(session, document_id, document_type, reason).await;
            self.publish(
                &topic,
                ProgressEvent::SigningProgress {
                    current: idx + 1,
                    total,
                    document_id: document_id.clone(),
                    success: result.success,
                },
            );
            results.push(result);
        }

        let response = BatchSignResponse::from_results(total, results);
        self.publish(
            &topic,
            ProgressEvent::SigningComplete {
                total,
                succeeded: response.succeeded,
                failed: response.failed,
            },
        );

        self.orchestrator.mark_session_used(session);

        info!(
            "Batch for '{}' done: {} signed, {} not signed",
            session.operator(),
            response.succeeded,
            response.failed
        );
        Ok(response)
    }

    async fn sign_item(
        &self,
        session: &Arc<Session>,
        document_id: &DocumentId,
        document_type: &DocumentType,
        reason: &str,
    ) -> BatchItemResult {
        match self.ledger.has_active_signature(document_id, document_type) {
            Ok(true) => return BatchItemResult::already_signed(document_id.clone()),
            Ok(false) => {}
            Err(e) => return BatchItemResult::failed(document_id.clone(), e),
        }

        match self
            .orchestrator
            .sign_document(session, document_id, document_type, reason, &self.location)
            .await
        {
            Ok(record) => BatchItemResult::signed(document_id.clone(), record.id),
            Err(Error::DocumentAlreadySigned(..)) => {
                BatchItemResult::already_signed(document_id.clone())
            }
            Err(e) => {
                warn!(
                    "Batch item {} '{}' for '{}' failed: {}",
                    document_type,
                    document_id,
                    session.operator(),
                    e
                );
                BatchItemResult::failed(document_id.clone(), e)
            }
        }
    }

    fn publish(&self, topic: &str, event: ProgressEvent) {
        if let Err(e) = self.progress.publish(topic, event) {
            debug!("Progress event not delivered: {}", e);
        }
    }
}

//! Approval engine: moves reviewed staged items into the knowledge base.

use std::sync::Arc;

use careerkb_shared::{
    ApprovalOutcome, CareerKbError, Relation, Resolution, Result, StageId, StageStatus,
    StagedItem,
};
use careerkb_storage::{ChangeSet, KnowledgeBaseStore, StagingStore};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::conflict::ConflictResolver;
use crate::preview::{self, StagedPreview};

/// Applies approve/reject decisions.
///
/// Every decision holds the knowledge-base lock for its whole duration and
/// takes the staging lock only for the status write, so concurrent decisions
/// serialize on the knowledge base.
#[derive(Debug, Clone)]
pub struct ApprovalEngine {
    staging: Arc<StagingStore>,
    kb: Arc<KnowledgeBaseStore>,
    resolver: ConflictResolver,
}

fn mark_approved(
    id: StageId,
    outcome: ApprovalOutcome,
    overridden: bool,
) -> impl FnOnce(&mut StagedItem) -> Result<()> {
    move |item| {
        if item.status != StageStatus::Pending {
            return Err(CareerKbError::approval(format!(
                "staged item {id} is {} and cannot be approved",
                item.status
            )));
        }
        item.status = StageStatus::Approved;
        item.resolution = Some(Resolution::Approved {
            at: Utc::now(),
            outcome,
            overridden,
        });
        Ok(())
    }
}

impl ApprovalEngine {
    pub fn new(
        staging: Arc<StagingStore>,
        kb: Arc<KnowledgeBaseStore>,
        resolver: ConflictResolver,
    ) -> Self {
        Self {
            staging,
            kb,
            resolver,
        }
    }

    /// Approve a Pending item.
    ///
    /// Re-approving an Approved item returns its recorded outcome; approving
    /// a Rejected item fails.
    #[instrument(skip_all, fields(stage_id = %id, overridable = override_contradictions))]
    pub async fn approve(&self, id: StageId, override_contradictions: bool) -> Result<ApprovalOutcome> {
        let guard = self.kb.lock().await?;
        let item = self.staging.get(id).await?;

        match (&item.status, &item.resolution) {
            (StageStatus::Approved, Some(Resolution::Approved { outcome, .. })) => {
                info!("already approved");
                return Ok(outcome.clone());
            }
            (StageStatus::Approved, _) => return Ok(ApprovalOutcome::default()),
            (StageStatus::Rejected, _) => {
                return Err(CareerKbError::approval(format!(
                    "staged item {id} was rejected and cannot be approved"
                )));
            }
            (StageStatus::Pending, _) => {}
        }

        let kb = guard.load().await?;

        // A commit already landed for this item before its status was written.
        if let Some(marker) = kb.manifest.marker_for(id) {
            warn!(revision = marker.revision, "completing interrupted approval");
            let outcome = ApprovalOutcome {
                applied: marker.applied.clone(),
                skipped: marker.skipped.clone(),
                revision: Some(marker.revision),
            };
            let overridden = marker.overridden;
            self.staging
                .modify(id, mark_approved(id, outcome.clone(), overridden))
                .await?;
            return Ok(outcome);
        }

        // The gate runs on fresh annotations; nothing is written unless the
        // approval goes ahead.
        let analyzed = self.resolver.analyze(&item, &kb)?;
        let contradictions = analyzed
            .annotations
            .iter()
            .filter(|a| a.relation == Relation::Contradiction)
            .count();
        if contradictions > 0 && !override_contradictions {
            return Err(CareerKbError::approval(format!(
                "staged item {id} has {contradictions} unresolved contradiction(s); \
                 re-run with the override flag to apply anyway"
            )));
        }

        let mut upserts = Vec::new();
        let mut skipped = Vec::new();
        for draft in &analyzed.payload {
            let annotation = analyzed.annotation_for(&draft.id);
            if annotation.is_some_and(|a| a.relation == Relation::Duplicate) {
                skipped.push(draft.id.clone());
                continue;
            }
            let mut entry = draft.clone();
            if let Some(target) = annotation.and_then(|a| a.replace_target()) {
                entry.id = target.clone();
            }
            upserts.push(entry);
        }

        let overridden = contradictions > 0;
        let outcome = if upserts.is_empty() {
            ApprovalOutcome {
                applied: Vec::new(),
                skipped,
                revision: None,
            }
        } else {
            let marker = guard
                .commit(ChangeSet {
                    stage_id: id,
                    upserts,
                    skipped,
                    overridden,
                })
                .await?;
            ApprovalOutcome {
                applied: marker.applied,
                skipped: marker.skipped,
                revision: Some(marker.revision),
            }
        };

        let approve = mark_approved(id, outcome.clone(), overridden);
        self.staging
            .modify(id, move |stored| {
                stored.annotations = analyzed.annotations;
                stored.analyzed_at = analyzed.analyzed_at;
                approve(stored)
            })
            .await?;
        info!(
            applied = outcome.applied.len(),
            skipped = outcome.skipped.len(),
            revision = ?outcome.revision,
            "approved staged item"
        );
        Ok(outcome)
    }

    /// Reject a Pending item. Re-rejecting is a no-op; rejecting an Approved
    /// item fails.
    #[instrument(skip_all, fields(stage_id = %id))]
    pub async fn reject(&self, id: StageId, reason: Option<String>) -> Result<()> {
        let _guard = self.kb.lock().await?;
        match self.staging.get(id).await?.status {
            StageStatus::Rejected => {
                info!("already rejected");
                return Ok(());
            }
            StageStatus::Approved => {
                return Err(CareerKbError::approval(format!(
                    "staged item {id} was approved and cannot be rejected"
                )));
            }
            StageStatus::Pending => {}
        }
        self.staging
            .modify(id, move |item| {
                item.status = StageStatus::Rejected;
                item.resolution = Some(Resolution::Rejected {
                    at: Utc::now(),
                    reason,
                });
                Ok(())
            })
            .await?;
        info!("rejected staged item");
        Ok(())
    }

    /// Diff a staged item against the current knowledge base.
    ///
    /// Pending items are re-analyzed (without persisting) so the diff reflects
    /// the knowledge base as it is now.
    pub async fn preview(&self, id: StageId) -> Result<StagedPreview> {
        let mut item = self.staging.get(id).await?;
        let kb = self.kb.snapshot().await?;
        if item.status == StageStatus::Pending {
            match self.resolver.analyze(&item, &kb) {
                Ok(analyzed) => item = analyzed,
                Err(e) => {
                    warn!(stage_id = %id, error = %e, "re-analysis failed, showing stored annotations");
                    item.warnings.push(e.to_string());
                }
            }
        }
        Ok(preview::preview(&item, &kb))
    }
}

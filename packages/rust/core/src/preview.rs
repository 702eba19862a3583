//! Reviewer-facing diff of a staged item against the knowledge base.

use careerkb_shared::{
    Category, EntryId, Entry, EntryKind, KnowledgeBase, PiiFinding, Relation, StageId,
    StageStatus, StagedItem,
};
use serde::Serialize;

/// One field that differs between a draft and its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftPreview {
    pub draft_id: EntryId,
    pub category: Category,
    pub title: String,
    /// `None` until the item has been analyzed.
    pub relation: Option<Relation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<EntryId>,
    /// Entry an overriding approval would overwrite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaces: Option<EntryId>,
    pub score: f64,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedPreview {
    pub id: StageId,
    pub status: StageStatus,
    pub source: String,
    pub analyzed: bool,
    pub warnings: Vec<String>,
    pub findings: Vec<PiiFinding>,
    pub drafts: Vec<DraftPreview>,
}

/// Comparable string form of every populated field.
fn fields(entry: &Entry) -> Vec<(&'static str, String)> {
    let mut out = vec![("title", entry.title.clone())];
    match &entry.kind {
        EntryKind::Experience {
            organization,
            employment,
        } => {
            out.extend(organization.clone().map(|o| ("organization", o)));
            out.push((
                "employment",
                serde_json::to_value(employment)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
            ));
        }
        EntryKind::Project { url } => out.extend(url.clone().map(|u| ("url", u))),
        EntryKind::Patent { number } => out.extend(number.clone().map(|n| ("number", n))),
        EntryKind::Certification { issuer } => out.extend(issuer.clone().map(|i| ("issuer", i))),
        EntryKind::Note => {}
    }
    out.extend(entry.dates.map(|d| ("dates", d.to_string())));
    out.push(("description", entry.description.clone()));
    if !entry.tags.is_empty() {
        out.push(("tags", entry.tags.join(", ")));
    }
    out.push(("body", entry.body.clone()));
    out.retain(|(_, value)| !value.is_empty());
    out
}

/// Field-level changes turning `before` into `after`.
pub fn diff(before: Option<&Entry>, after: &Entry) -> Vec<FieldChange> {
    let old = before.map(fields).unwrap_or_default();
    let new = fields(after);
    let lookup = |list: &[(&'static str, String)], name: &str| {
        list.iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value.clone())
    };

    let mut names: Vec<&'static str> = new.iter().map(|(f, _)| *f).collect();
    names.extend(old.iter().map(|(f, _)| *f).filter(|f| !new.iter().any(|(n, _)| n == f)));

    names
        .into_iter()
        .filter_map(|field| {
            let (before, after) = (lookup(&old, field), lookup(&new, field));
            (before != after).then_some(FieldChange {
                field,
                before,
                after,
            })
        })
        .collect()
}

/// Build the preview from the item's annotations.
pub fn preview(item: &StagedItem, kb: &KnowledgeBase) -> StagedPreview {
    let drafts = item
        .payload
        .iter()
        .map(|draft| {
            let annotation = item.annotation_for(&draft.id);
            let replaced = annotation
                .and_then(|a| a.replace_target())
                .and_then(|id| kb.get(draft.category(), id));
            let changes = match annotation.map(|a| a.relation) {
                Some(Relation::Duplicate) => Vec::new(),
                _ => diff(replaced, draft),
            };
            DraftPreview {
                draft_id: draft.id.clone(),
                category: draft.category(),
                title: draft.title.clone(),
                relation: annotation.map(|a| a.relation),
                target: annotation.and_then(|a| a.target.clone()),
                replaces: annotation.and_then(|a| a.replaces.clone()),
                score: annotation.map_or(0.0, |a| a.score),
                changes,
            }
        })
        .collect();

    StagedPreview {
        id: item.id,
        status: item.status,
        source: item.source.label.clone(),
        analyzed: item.analyzed_at.is_some(),
        warnings: item.warnings.clone(),
        findings: item.findings.clone(),
        drafts,
    }
}

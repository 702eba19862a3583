//! Conflict resolver: classifies each draft entry against the knowledge base.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use careerkb_shared::{
    CareerKbError, Category, ConflictAnnotation, EmploymentKind, Entry, EntryId, EntryKind,
    KnowledgeBase, Relation, Result, SimilarityConfig, StagedItem, fold,
};
use chrono::Utc;
use tracing::{debug, instrument};

use crate::similarity::similarity;

/// Title similarity required alongside a strong text match.
const LOOSE_TITLE_THRESHOLD: f64 = 0.5;

/// A relation to one existing entry, before picking the best target.
#[derive(Debug, Clone)]
struct Candidate<'a> {
    relation: Relation,
    target: &'a EntryId,
    score: f64,
}

impl Candidate<'_> {
    fn rank(&self) -> u8 {
        match self.relation {
            Relation::Duplicate => 3,
            Relation::Contradiction => 2,
            Relation::Update => 1,
            Relation::New => 0,
        }
    }

    /// Higher rank, then higher score, then smaller id. A total order over
    /// distinct targets, so the winner does not depend on iteration order.
    fn beats(&self, other: &Self) -> bool {
        let order = self
            .rank()
            .cmp(&other.rank())
            .then_with(|| self.score.total_cmp(&other.score))
            .then_with(|| other.target.cmp(self.target));
        order == Ordering::Greater
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    config: SimilarityConfig,
}

impl ConflictResolver {
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    /// Annotate every draft of `item` against `kb`.
    ///
    /// Fails when a category the item touches holds malformed entries, since
    /// those cannot be compared.
    #[instrument(skip_all, fields(stage_id = %item.id, drafts = item.payload.len()))]
    pub fn analyze(&self, item: &StagedItem, kb: &KnowledgeBase) -> Result<StagedItem> {
        let touched: BTreeSet<Category> = item.payload.iter().map(Entry::category).collect();
        for category in &touched {
            if let Some(bad) = kb.malformed_in(*category).next() {
                return Err(CareerKbError::conflict(format!(
                    "{} entry {} is malformed: {}",
                    category.file_name(),
                    bad.index,
                    bad.reason
                )));
            }
        }

        let mut annotations: Vec<ConflictAnnotation> = item
            .payload
            .iter()
            .map(|draft| self.classify(draft, kb.entries(draft.category())))
            .collect();
        settle_within_item(&item.payload, &mut annotations);

        let mut annotated = item.clone();
        annotated.annotations = annotations;
        annotated.analyzed_at = Some(Utc::now());
        debug!(summary = ?annotated.summary(), "analyzed staged item");
        Ok(annotated)
    }

    /// Classify one draft against the existing entries of its category.
    ///
    /// A contradiction also records, in `replaces`, the entry the draft is a
    /// revision of, so an overriding approval updates it in place.
    pub fn classify(&self, draft: &Entry, existing: &[Entry]) -> ConflictAnnotation {
        let candidates: Vec<Candidate<'_>> = existing
            .iter()
            .filter_map(|entry| self.relate(draft, entry))
            .collect();
        let best = pick(candidates.iter());

        match best {
            Some(c) => {
                let replaces = (c.relation == Relation::Contradiction)
                    .then(|| pick(candidates.iter().filter(|c| c.relation == Relation::Update)))
                    .flatten()
                    .map(|u| u.target.clone());
                ConflictAnnotation {
                    draft_id: draft.id.clone(),
                    target: Some(c.target.clone()),
                    relation: c.relation,
                    score: c.score,
                    replaces,
                }
            }
            None => ConflictAnnotation {
                draft_id: draft.id.clone(),
                target: None,
                relation: Relation::New,
                score: 0.0,
                replaces: None,
            },
        }
    }

    fn relate<'a>(&self, draft: &Entry, existing: &'a Entry) -> Option<Candidate<'a>> {
        if draft.category() != existing.category() {
            return None;
        }
        let target = &existing.id;
        if draft.fingerprint() == existing.fingerprint() {
            return Some(Candidate {
                relation: Relation::Duplicate,
                target,
                score: 1.0,
            });
        }

        let title = similarity(&draft.title, &existing.title);
        let text = similarity(&draft.text(), &existing.text());
        let score = (title + text) / 2.0;
        let is_match = self.identity_match(draft, existing, title, text);

        let relation = if is_match && text >= self.config.duplicate_threshold {
            Relation::Duplicate
        } else if contradicts(draft, existing, self.config.title_threshold) {
            Relation::Contradiction
        } else if is_match {
            Relation::Update
        } else {
            return None;
        };
        Some(Candidate {
            relation,
            target,
            score,
        })
    }

    fn identity_match(&self, draft: &Entry, existing: &Entry, title: f64, text: f64) -> bool {
        if !dates_compatible(draft, existing) {
            return false;
        }
        let similar = title >= self.config.title_threshold
            || (text >= self.config.text_threshold && title >= LOOSE_TITLE_THRESHOLD);
        if !similar {
            return false;
        }
        draft.category() != Category::Experience
            || orgs_compatible(draft, existing, self.config.title_threshold)
    }
}

fn pick<'c, 'a: 'c>(candidates: impl Iterator<Item = &'c Candidate<'a>>) -> Option<&'c Candidate<'a>> {
    candidates.fold(None, |best, candidate| match best {
        Some(b) if !candidate.beats(b) => Some(b),
        _ => Some(candidate),
    })
}

/// Resolve clashes between drafts of the same item.
///
/// A draft whose content repeats an earlier draft becomes a duplicate. When
/// several drafts would overwrite the same entry, the best scoring one (then
/// the smallest draft id) keeps it and the others become contradictions
/// against that entry.
fn settle_within_item(payload: &[Entry], annotations: &mut [ConflictAnnotation]) {
    let mut seen = HashSet::new();
    for (draft, annotation) in payload.iter().zip(annotations.iter_mut()) {
        if !seen.insert(draft.fingerprint()) && annotation.relation != Relation::Duplicate {
            debug!(draft = %draft.id, "draft repeats an earlier draft of the same item");
            *annotation = ConflictAnnotation {
                draft_id: draft.id.clone(),
                target: None,
                relation: Relation::Duplicate,
                score: 1.0,
                replaces: None,
            };
        }
    }

    let mut claims: BTreeMap<EntryId, Vec<usize>> = BTreeMap::new();
    for (index, annotation) in annotations.iter().enumerate() {
        if let Some(target) = annotation.replace_target() {
            claims.entry(target.clone()).or_default().push(index);
        }
    }
    for (target, claimants) in claims {
        let Some(&keeper) = claimants.iter().max_by(|&&a, &&b| {
            let (a, b) = (&annotations[a], &annotations[b]);
            a.score
                .total_cmp(&b.score)
                .then_with(|| b.draft_id.cmp(&a.draft_id))
        }) else {
            continue;
        };
        for index in claimants.into_iter().filter(|&i| i != keeper) {
            let annotation = &mut annotations[index];
            debug!(draft = %annotation.draft_id, target = %target, "another draft already revises this entry");
            annotation.relation = Relation::Contradiction;
            annotation.target = Some(target.clone());
            annotation.replaces = None;
        }
    }
}

fn dates_compatible(a: &Entry, b: &Entry) -> bool {
    match (a.dates, b.dates) {
        (Some(x), Some(y)) => x.overlaps(&y),
        _ => true,
    }
}

fn orgs_compatible(a: &Entry, b: &Entry, threshold: f64) -> bool {
    match (a.kind.organization(), b.kind.organization()) {
        (Some(x), Some(y)) => similarity(x, y) >= threshold,
        _ => true,
    }
}

fn is_full_time(entry: &Entry) -> bool {
    matches!(
        entry.kind,
        EntryKind::Experience {
            employment: EmploymentKind::FullTime,
            ..
        }
    )
}

/// Two full-time roles at different employers over strictly overlapping
/// dates cannot both be true.
fn contradicts(draft: &Entry, existing: &Entry, threshold: f64) -> bool {
    if !(is_full_time(draft) && is_full_time(existing)) {
        return false;
    }
    let (Some(a), Some(b)) = (draft.dates, existing.dates) else {
        return false;
    };
    let orgs = (draft.kind.organization(), existing.kind.organization());
    let (Some(x), Some(y)) = orgs else {
        return false;
    };
    fold(x) != fold(y)
        && similarity(x, y) < threshold
        && a.overlaps_strictly(&b)
}

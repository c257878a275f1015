use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::record::{ContentRecord, decode_content_records};
use crate::store::{
    CONTENT_TABLE, OrderBy, RecordStoreRead, RecordStoreWrite, SelectQuery, ensure_slug_column,
};

/// Base used when a title normalizes to nothing (empty or pure punctuation).
pub const FALLBACK_SLUG_BASE: &str = "content-item";

/// Normalize a title into a slug base: lower-case, keep `[a-z0-9]`, collapse
/// any run of whitespace and hyphens into a single hyphen, trim hyphens.
pub fn derive_slug_base(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for ch in title.to_lowercase().chars() {
        if ch.is_whitespace() || ch == '-' {
            pending_hyphen = true;
            continue;
        }
        if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() {
            continue;
        }
        if pending_hyphen && !slug.is_empty() {
            slug.push('-');
        }
        pending_hyphen = false;
        slug.push(ch);
    }
    if slug.is_empty() {
        FALLBACK_SLUG_BASE.to_string()
    } else {
        slug
    }
}

/// Find the first free slug for `base`: the base itself, then `base-1`,
/// `base-2`, ... Comparison is exact; everything is already lower-cased.
fn unique_slug(base: &str, taken: &BTreeSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut counter = 1usize;
    loop {
        let candidate = format!("{base}-{counter}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedSlug {
    pub id: String,
    pub title: String,
    pub universe_id: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default)]
pub struct SlugPlan {
    pub planned: Vec<PlannedSlug>,
    /// Final taken-slug set per universe, including the newly planned ones.
    pub taken_by_universe: BTreeMap<String, BTreeSet<String>>,
}

impl SlugPlan {
    /// Newly planned slugs keyed by record identifier.
    pub fn slug_by_id(&self) -> BTreeMap<String, String> {
        self.planned
            .iter()
            .map(|item| (item.id.clone(), item.slug.clone()))
            .collect()
    }
}

/// Assign slugs to every unslugged record of one partition, in input order.
/// `taken` is the partition's taken-slug set; chosen slugs are inserted into
/// it immediately so same-batch title collisions disambiguate.
pub fn assign_partition(
    records: &[&ContentRecord],
    taken: &mut BTreeSet<String>,
) -> Vec<PlannedSlug> {
    let mut planned = Vec::new();
    for record in records {
        if record.slug.is_some() {
            continue;
        }
        let base = derive_slug_base(&record.title);
        let slug = unique_slug(&base, taken);
        taken.insert(slug.clone());
        planned.push(PlannedSlug {
            id: record.id.clone(),
            title: record.title.clone(),
            universe_id: record.universe_id.clone(),
            slug,
        });
    }
    planned
}

/// Partition records by universe, seed each partition's taken set from
/// existing slugs, and plan assignments for the rest. Pure; no store calls.
pub fn plan_slug_assignments(records: &[ContentRecord]) -> SlugPlan {
    let mut partitions: BTreeMap<String, Vec<&ContentRecord>> = BTreeMap::new();
    let mut taken_by_universe: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for record in records {
        partitions
            .entry(record.universe_id.clone())
            .or_default()
            .push(record);
        let taken = taken_by_universe.entry(record.universe_id.clone()).or_default();
        if let Some(slug) = &record.slug {
            taken.insert(slug.clone());
        }
    }

    let mut planned = Vec::new();
    for (universe_id, members) in &partitions {
        let taken = taken_by_universe
            .entry(universe_id.clone())
            .or_default();
        planned.extend(assign_partition(members, taken));
    }

    SlugPlan {
        planned,
        taken_by_universe,
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackfillOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlugItemResult {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlugBackfillReport {
    pub success: bool,
    pub dry_run: bool,
    pub records_seen: usize,
    pub planned: usize,
    pub updated: usize,
    pub errors: Vec<String>,
    pub items: Vec<SlugItemResult>,
    pub request_count: usize,
}

/// Backfill slugs for every content record that lacks one. One write per
/// record; a failed write is recorded and skipped so a re-run picks up
/// exactly the records still missing a slug.
pub fn backfill_slugs<S: RecordStoreWrite>(
    store: &mut S,
    options: &BackfillOptions,
) -> Result<SlugBackfillReport> {
    ensure_slug_column(store)?;

    let rows = store.select(
        CONTENT_TABLE,
        &SelectQuery {
            columns: Some("id,title,universe_id,slug".to_string()),
            ..SelectQuery::default()
        },
    )?;
    let records =
        decode_content_records(&rows).context("content_items rows failed schema validation")?;
    let plan = plan_slug_assignments(&records);

    let mut report = SlugBackfillReport {
        success: true,
        dry_run: options.dry_run,
        records_seen: records.len(),
        planned: plan.planned.len(),
        updated: 0,
        errors: Vec::new(),
        items: Vec::new(),
        request_count: 0,
    };

    for item in &plan.planned {
        if options.dry_run {
            report.items.push(SlugItemResult {
                id: item.id.clone(),
                title: item.title.clone(),
                slug: item.slug.clone(),
                action: "would_assign".to_string(),
                detail: None,
            });
            continue;
        }
        match store.update_by_id(CONTENT_TABLE, &item.id, &json!({ "slug": item.slug })) {
            Ok(()) => {
                report.updated += 1;
                report.items.push(SlugItemResult {
                    id: item.id.clone(),
                    title: item.title.clone(),
                    slug: item.slug.clone(),
                    action: "assigned".to_string(),
                    detail: None,
                });
            }
            Err(error) => {
                report.errors.push(format!("{}: {error:#}", item.title));
                report.items.push(SlugItemResult {
                    id: item.id.clone(),
                    title: item.title.clone(),
                    slug: item.slug.clone(),
                    action: "error".to_string(),
                    detail: Some(format!("{error:#}")),
                });
            }
        }
    }

    report.success = report.errors.is_empty();
    report.request_count = store.request_count();
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct SlugVerifyEntry {
    pub universe_id: String,
    pub title: String,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlugVerifyReport {
    pub total: usize,
    pub missing: usize,
    /// `universe_id: slug` pairs that appear on more than one record.
    pub duplicates: Vec<String>,
    pub entries: Vec<SlugVerifyEntry>,
    pub request_count: usize,
}

/// List `title -> slug` for every content record and flag duplicate slugs
/// within a universe. Read-only.
pub fn verify_slugs<S: RecordStoreRead>(store: &mut S) -> Result<SlugVerifyReport> {
    let rows = store.select(
        CONTENT_TABLE,
        &SelectQuery {
            columns: Some("id,title,universe_id,slug".to_string()),
            order: vec![OrderBy::ascending("universe_id"), OrderBy::ascending("title")],
            ..SelectQuery::default()
        },
    )?;
    let records =
        decode_content_records(&rows).context("content_items rows failed schema validation")?;

    let mut seen: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut entries = Vec::new();
    let mut missing = 0usize;
    for record in &records {
        match &record.slug {
            Some(slug) => {
                *seen
                    .entry((record.universe_id.clone(), slug.clone()))
                    .or_insert(0) += 1;
            }
            None => missing += 1,
        }
        entries.push(SlugVerifyEntry {
            universe_id: record.universe_id.clone(),
            title: record.title.clone(),
            slug: record.slug.clone(),
        });
    }

    let duplicates = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|((universe_id, slug), _)| format!("{universe_id}: {slug}"))
        .collect();

    Ok(SlugVerifyReport {
        total: records.len(),
        missing,
        duplicates,
        entries,
        request_count: store.request_count(),
    })
}

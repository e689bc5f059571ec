//! Query engine: filename/tag filters, sorting and pagination

use crate::config::QueryConfig;
use crate::entry::{normalize_tags, Entry, EntryId};
use crate::error::VaultError;
use crate::tags::TagIndex;
use crate::vault::Catalog;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// How entries flagged missing take part in a search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFilter {
    /// Only entries present on disk (default)
    #[default]
    Exclude,
    /// Present and missing entries alike
    Include,
    /// Only missing entries
    Only,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Path,
    /// File name, case-insensitive
    Name,
    Modified,
    Size,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Search request.
///
/// Offsets are only meaningful within one store generation: any scan or bulk
/// mutation invalidates them, and callers must restart from offset 0. Passing
/// the `generation` of the first page makes later pages fail with
/// `StaleGeneration` instead of silently shifting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    /// Case-insensitive substring of the relative path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Entry must carry every one of these tags
    pub include: Vec<String>,
    /// Entry must carry none of these tags
    pub exclude: Vec<String>,
    pub missing: MissingFilter,
    pub sort: SortKey,
    pub order: SortOrder,
    pub offset: usize,
    /// Page size (config default when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Generation the offset was computed under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filename(mut self, needle: impl Into<String>) -> Self {
        self.filename = Some(needle.into());
        self
    }

    pub fn include_tag(mut self, tag: impl Into<String>) -> Self {
        self.include.push(tag.into());
        self
    }

    pub fn exclude_tag(mut self, tag: impl Into<String>) -> Self {
        self.exclude.push(tag.into());
        self
    }

    pub fn with_missing(mut self, missing: MissingFilter) -> Self {
        self.missing = missing;
        self
    }

    pub fn sorted_by(mut self, sort: SortKey, order: SortOrder) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn at_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    fn resolved_limit(&self, config: &QueryConfig) -> crate::Result<usize> {
        match self.limit {
            None => Ok(config.default_page_size),
            Some(0) => Err(VaultError::InvalidSpec("limit must be at least 1".into())),
            Some(n) if n > config.max_page_size => Err(VaultError::InvalidSpec(format!(
                "limit {} exceeds the maximum page size of {}",
                n, config.max_page_size
            ))),
            Some(n) => Ok(n),
        }
    }
}

/// One page of search results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub entries: Vec<Entry>,
    /// Matches before pagination
    pub total: usize,
    pub offset: usize,
    pub has_more: bool,
    /// Store generation the page was computed under
    pub generation: u64,
}

pub(crate) fn execute(
    catalog: &Catalog,
    config: &QueryConfig,
    spec: &QuerySpec,
) -> crate::Result<SearchResult> {
    let limit = spec.resolved_limit(config)?;
    let include = normalize_tags(&spec.include)?;
    let exclude = normalize_tags(&spec.exclude)?;

    catalog.generation.check_cursor(spec.generation, spec.offset)?;
    let current = catalog.generation.value();

    // (1) live candidates: smallest-bucket-first intersection, or everything
    let mut candidates: BTreeSet<EntryId> = match spec.missing {
        MissingFilter::Only => BTreeSet::new(),
        _ if include.is_empty() => catalog
            .store
            .ids(MissingFilter::Exclude)?
            .into_iter()
            .collect(),
        _ => intersect_buckets(&catalog.tags, &include),
    };

    // (2) subtract excluded buckets
    for tag in &exclude {
        if let Some(bucket) = catalog.tags.ids_for_tag(tag) {
            candidates.retain(|id| !bucket.contains(id));
        }
    }

    let mut entries = catalog.store.get_many(&candidates)?;
    entries.retain(|e| !e.missing);

    // (3) missing entries are not in the tag index, so test their stored tags
    if spec.missing != MissingFilter::Exclude {
        let missing_ids = catalog.store.ids(MissingFilter::Only)?;
        entries.extend(
            catalog
                .store
                .get_many(&missing_ids)?
                .into_iter()
                .filter(|e| include.is_subset(&e.tags) && e.tags.is_disjoint(&exclude)),
        );
    }

    // (4) filename substring
    if let Some(needle) = spec
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let needle = needle.to_lowercase();
        entries.retain(|e| e.relative_path.to_lowercase().contains(&needle));
    }

    // (5) sort, then paginate
    sort_entries(&mut entries, spec.sort, spec.order);
    let total = entries.len();
    let page: Vec<Entry> = entries.into_iter().skip(spec.offset).take(limit).collect();
    let has_more = spec.offset.saturating_add(page.len()) < total;

    Ok(SearchResult {
        entries: page,
        total,
        offset: spec.offset,
        has_more,
        generation: current,
    })
}

/// IDs carrying every tag in `include`, intersecting smallest bucket first
fn intersect_buckets(tags: &TagIndex, include: &BTreeSet<String>) -> BTreeSet<EntryId> {
    let mut buckets = Vec::with_capacity(include.len());
    for tag in include {
        match tags.ids_for_tag(tag) {
            Some(bucket) => buckets.push(bucket),
            None => return BTreeSet::new(),
        }
    }
    buckets.sort_by_key(|b| b.len());

    let Some((smallest, rest)) = buckets.split_first() else {
        return BTreeSet::new();
    };
    smallest
        .iter()
        .filter(|id| rest.iter().all(|b| b.contains(*id)))
        .cloned()
        .collect()
}

/// Stable ordering by `key`; ties always break on ascending ID
fn sort_entries(entries: &mut [Entry], key: SortKey, order: SortOrder) {
    entries.sort_by(|a, b| {
        let primary = match key {
            SortKey::Path => a.relative_path.cmp(&b.relative_path),
            SortKey::Name => a
                .file_name()
                .to_lowercase()
                .cmp(&b.file_name().to_lowercase())
                .then_with(|| a.relative_path.cmp(&b.relative_path)),
            SortKey::Modified => a.modified_at.cmp(&b.modified_at),
            SortKey::Size => a.size_bytes.cmp(&b.size_bytes),
        };
        let primary = match order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        match primary {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Generation;
    use crate::store::EntryStore;

    fn catalog(entries: &[(&str, &str, bool)]) -> Catalog {
        let store = EntryStore::open_in_memory().unwrap();
        for (i, (path, tags, missing)) in entries.iter().enumerate() {
            let mut entry = Entry::new(*path, (i as u64 + 1) * 10, 1_000 - i as i64);
            entry.tags = tags
                .split(',')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            entry.missing = *missing;
            store.upsert(&entry).unwrap();
        }
        let tags = TagIndex::rebuild(&store).unwrap();
        Catalog {
            store,
            tags,
            generation: Generation::from_value(3),
        }
    }

    fn paths(result: &SearchResult) -> Vec<&str> {
        result
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect()
    }

    fn run(catalog: &Catalog, spec: &QuerySpec) -> SearchResult {
        execute(catalog, &QueryConfig::default(), spec).unwrap()
    }

    #[test]
    fn test_include_returns_exactly_tagged_live_entries() {
        let c = catalog(&[
            ("a.jpg", "", false),
            ("b/c.png", "cat", false),
            ("d.png", "cat", true),
        ]);
        let result = run(&c, &QuerySpec::new().include_tag("Cat"));
        assert_eq!(paths(&result), vec!["b/c.png"]);
        assert_eq!(result.total, 1);
    }

    #[test]
    fn test_include_requires_all_tags() {
        let c = catalog(&[
            ("a.jpg", "cat,dog", false),
            ("b.jpg", "cat", false),
            ("c.jpg", "dog", false),
        ]);
        let result = run(&c, &QuerySpec::new().include_tag("cat").include_tag("dog"));
        assert_eq!(paths(&result), vec!["a.jpg"]);

        let none = run(&c, &QuerySpec::new().include_tag("cat").include_tag("unknown"));
        assert_eq!(none.total, 0);
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let c = catalog(&[
            ("a.jpg", "cat,nsfw", false),
            ("b.jpg", "cat", false),
            ("c.jpg", "nsfw", false),
        ]);
        let result = run(&c, &QuerySpec::new().include_tag("cat").exclude_tag("NSFW"));
        assert_eq!(paths(&result), vec!["b.jpg"]);

        let only_exclude = run(&c, &QuerySpec::new().exclude_tag("nsfw"));
        assert_eq!(paths(&only_exclude), vec!["b.jpg"]);
    }

    #[test]
    fn test_missing_filter() {
        let c = catalog(&[
            ("a.jpg", "cat", false),
            ("gone.jpg", "cat", true),
            ("gone2.jpg", "dog", true),
        ]);
        let default = run(&c, &QuerySpec::new());
        assert_eq!(paths(&default), vec!["a.jpg"]);

        let include = run(&c, &QuerySpec::new().with_missing(MissingFilter::Include));
        assert_eq!(paths(&include), vec!["a.jpg", "gone.jpg", "gone2.jpg"]);

        let only_cats = run(
            &c,
            &QuerySpec::new()
                .include_tag("cat")
                .with_missing(MissingFilter::Only),
        );
        assert_eq!(paths(&only_cats), vec!["gone.jpg"]);

        let include_no_dogs = run(
            &c,
            &QuerySpec::new()
                .exclude_tag("dog")
                .with_missing(MissingFilter::Include),
        );
        assert_eq!(paths(&include_no_dogs), vec!["a.jpg", "gone.jpg"]);
    }

    #[test]
    fn test_filename_substring_is_case_insensitive() {
        let c = catalog(&[
            ("Holiday/Beach.JPG", "", false),
            ("work/desk.png", "", false),
        ]);
        let result = run(&c, &QuerySpec::new().with_filename("beach"));
        assert_eq!(paths(&result), vec!["Holiday/Beach.JPG"]);

        let by_dir = run(&c, &QuerySpec::new().with_filename("HOLIDAY/"));
        assert_eq!(by_dir.total, 1);

        let blank = run(&c, &QuerySpec::new().with_filename("  "));
        assert_eq!(blank.total, 2);
    }

    #[test]
    fn test_sorting_and_tie_break() {
        let c = catalog(&[
            ("b.jpg", "", false),
            ("a.jpg", "", false),
            ("c/a.jpg", "", false),
        ]);
        let by_path = run(&c, &QuerySpec::new());
        assert_eq!(paths(&by_path), vec!["a.jpg", "b.jpg", "c/a.jpg"]);

        // sizes are 10, 20, 30 in insertion order
        let by_size_desc = run(
            &c,
            &QuerySpec::new().sorted_by(SortKey::Size, SortOrder::Desc),
        );
        assert_eq!(paths(&by_size_desc), vec!["c/a.jpg", "a.jpg", "b.jpg"]);

        // mtimes descend in insertion order
        let by_modified = run(&c, &QuerySpec::new().sorted_by(SortKey::Modified, SortOrder::Asc));
        assert_eq!(paths(&by_modified), vec!["c/a.jpg", "a.jpg", "b.jpg"]);

        let by_name = run(&c, &QuerySpec::new().sorted_by(SortKey::Name, SortOrder::Asc));
        assert_eq!(paths(&by_name), vec!["a.jpg", "c/a.jpg", "b.jpg"]);
    }

    #[test]
    fn test_pagination() {
        let c = catalog(&[
            ("1.jpg", "", false),
            ("2.jpg", "", false),
            ("3.jpg", "", false),
        ]);
        let first = run(&c, &QuerySpec::new().page(0, 2));
        assert_eq!(paths(&first), vec!["1.jpg", "2.jpg"]);
        assert!(first.has_more);
        assert_eq!(first.total, 3);

        let second = run(&c, &QuerySpec::new().page(2, 2).at_generation(first.generation));
        assert_eq!(paths(&second), vec!["3.jpg"]);
        assert!(!second.has_more);

        let past_end = run(&c, &QuerySpec::new().page(10, 2));
        assert!(past_end.entries.is_empty());
        assert_eq!(past_end.total, 3);
    }

    #[test]
    fn test_stale_generation_rejected_for_later_pages() {
        let c = catalog(&[("1.jpg", "", false)]);
        let err = execute(
            &c,
            &QueryConfig::default(),
            &QuerySpec::new().page(1, 10).at_generation(2),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            VaultError::StaleGeneration {
                expected: 2,
                found: 3
            }
        ));

        // offset 0 is always a fresh start
        let fresh = run(&c, &QuerySpec::new().page(0, 10).at_generation(2));
        assert_eq!(fresh.total, 1);
    }

    #[test]
    fn test_invalid_specs() {
        let c = catalog(&[]);
        let config = QueryConfig::default();
        for spec in [
            QuerySpec::new().page(0, 0),
            QuerySpec::new().page(0, config.max_page_size + 1),
            QuerySpec::new().include_tag(" "),
            QuerySpec::new().exclude_tag(""),
        ] {
            let err = execute(&c, &config, &spec).unwrap_err();
            assert!(matches!(err, VaultError::InvalidSpec(_)), "{spec:?}");
        }
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: QuerySpec =
            serde_json::from_str(r#"{"include": ["cat"], "missing": "only", "sort": "size"}"#)
                .unwrap();
        assert_eq!(spec.include, vec!["cat"]);
        assert_eq!(spec.missing, MissingFilter::Only);
        assert_eq!(spec.sort, SortKey::Size);
        assert_eq!(spec.order, SortOrder::Asc);
        assert_eq!(spec.offset, 0);
        assert!(spec.limit.is_none());
    }
}

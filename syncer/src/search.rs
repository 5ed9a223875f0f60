//! Resolution of declarative search templates into concrete source predicates.
//!
//! A template is a list of find groups. Each group holds `field -> criterion` pairs and may be
//! flagged `omit` to exclude matching records. Criteria may contain [`WATERMARK_PLACEHOLDER`],
//! which is replaced with a comparison against the table's last checkpoint (or an explicit
//! cutoff) when the search is built.

use chrono::{Duration, NaiveDateTime};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use syncer_config::shared::SearchConfig;

use crate::error::{ErrorKind, SyncResult};
use crate::store::checkpoint::CheckpointStore;
use crate::sync_error;
use crate::types::{TableSyncDescriptor, days_ago_start, parse_timestamp, previous_day_start};

/// Token marking where the watermark comparison is substituted.
pub const WATERMARK_PLACEHOLDER: &str = "DATETIME_SEARCH";

/// Separator of the source's range criterion (`start...end`).
const RANGE_SEPARATOR: &str = "...";

/// One `field -> criterion` pair of a find group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriterion {
    pub field: String,
    pub value: String,
}

impl SearchCriterion {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A find group. Criteria inside a group are combined with AND; groups are combined with OR,
/// except `omit` groups which subtract their matches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchGroup {
    pub criteria: Vec<SearchCriterion>,
    pub omit: bool,
}

impl SearchGroup {
    pub fn new(criteria: Vec<SearchCriterion>) -> Self {
        Self {
            criteria,
            omit: false,
        }
    }

    pub fn omitted(criteria: Vec<SearchCriterion>) -> Self {
        Self {
            criteria,
            omit: true,
        }
    }

    fn to_json(&self) -> JsonValue {
        let mut object = Map::new();
        for criterion in &self.criteria {
            object.insert(
                criterion.field.clone(),
                JsonValue::String(criterion.value.clone()),
            );
        }
        if self.omit {
            object.insert("omit".to_string(), JsonValue::String("true".to_string()));
        }

        JsonValue::Object(object)
    }
}

/// The declared, unresolved search of a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchTemplate {
    groups: Vec<SearchGroup>,
}

impl SearchTemplate {
    pub fn new(groups: Vec<SearchGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[SearchGroup] {
        &self.groups
    }

    /// Scans every criterion of every group for the watermark placeholder.
    pub fn contains_watermark(&self) -> bool {
        self.groups.iter().any(|group| {
            group
                .criteria
                .iter()
                .any(|criterion| criterion.value.contains(WATERMARK_PLACEHOLDER))
        })
    }

    pub fn references_field(&self, field: &str) -> bool {
        self.groups
            .iter()
            .any(|group| group.criteria.iter().any(|c| c.field == field))
    }

    fn to_predicate(&self) -> SearchPredicate {
        SearchPredicate {
            groups: self.groups.clone(),
        }
    }

    /// Replaces every occurrence of the placeholder with `replacement`.
    fn substitute(&self, replacement: &str) -> SearchPredicate {
        let groups = self
            .groups
            .iter()
            .map(|group| SearchGroup {
                criteria: group
                    .criteria
                    .iter()
                    .map(|criterion| SearchCriterion {
                        field: criterion.field.clone(),
                        value: criterion.value.replace(WATERMARK_PLACEHOLDER, replacement),
                    })
                    .collect(),
                omit: group.omit,
            })
            .collect();

        SearchPredicate { groups }
    }
}

/// A fully resolved search, ready to be sent to the source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPredicate {
    groups: Vec<SearchGroup>,
}

impl SearchPredicate {
    pub fn new(groups: Vec<SearchGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[SearchGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Returns the criterion for `field` in the first group that names it.
    pub fn criterion(&self, field: &str) -> Option<&str> {
        self.groups.iter().find_map(|group| {
            group
                .criteria
                .iter()
                .find(|c| c.field == field)
                .map(|c| c.value.as_str())
        })
    }

    /// Renders the predicate as the source's JSON find request body.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.groups.iter().map(SearchGroup::to_json).collect())
    }
}

/// Where the lower bound of an incremental search comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCutoff {
    /// Fixed look-back of this many days from now.
    ///
    /// The cutoff is truncated to midnight, so `DaysOld(1)` at any time of day starts at the
    /// beginning of yesterday.
    DaysOld(u32),
    /// Last checkpoint stored by the destination.
    Checkpoint,
}

/// Run-wide settings for resolving searches.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// `chrono` format the source expects for timestamps in criteria.
    pub timestamp_format: String,
    /// Lower bound used when a destination has no checkpoint yet.
    pub default_epoch: NaiveDateTime,
    /// When set, incremental searches become a bounded range of at most this many days.
    pub window_days: Option<u32>,
}

impl SearchOptions {
    pub fn from_config(config: &SearchConfig) -> SyncResult<Self> {
        let default_epoch = parse_timestamp(&config.default_epoch).ok_or_else(|| {
            sync_error!(
                ErrorKind::ConfigError,
                "Invalid default epoch",
                format!("`{}` is not a timestamp", config.default_epoch)
            )
        })?;

        Ok(Self {
            timestamp_format: config.timestamp_format.clone(),
            default_epoch,
            window_days: config.window_days,
        })
    }
}

/// The result of building a search for one table and destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSearch {
    pub predicate: SearchPredicate,
    /// Lower bound used for the watermark, `None` for non-incremental tables.
    pub since: Option<NaiveDateTime>,
    /// Upper bound of a windowed search. Once the window was fully read the checkpoint moves
    /// here, even when it held no records.
    pub until: Option<NaiveDateTime>,
}

/// Builds concrete source predicates from table descriptors.
#[derive(Debug, Clone)]
pub struct SearchBuilder {
    options: SearchOptions,
}

impl SearchBuilder {
    pub fn new(options: SearchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Builds the search for `descriptor`, reading the checkpoint from `store` when needed.
    pub async fn build(
        &self,
        descriptor: &TableSyncDescriptor,
        cutoff: SearchCutoff,
        store: &dyn CheckpointStore,
        now: NaiveDateTime,
    ) -> SyncResult<ResolvedSearch> {
        if !descriptor.is_timestamp_incremental() {
            return self.resolve(descriptor, cutoff, None, now);
        }

        let checkpoint = match cutoff {
            SearchCutoff::DaysOld(_) => None,
            SearchCutoff::Checkpoint => store.get_checkpoint(&descriptor.dest_table).await?,
        };

        let resolved = self.resolve(descriptor, cutoff, checkpoint, now)?;
        debug!(
            table = %descriptor.dest_table,
            since = ?resolved.since,
            until = ?resolved.until,
            "resolved incremental search"
        );

        Ok(resolved)
    }

    /// Resolves the search without touching any store.
    ///
    /// Non-incremental templates come back unchanged. Explicit day cutoffs and day-subtracted
    /// checkpoints compare with `>=`; plain checkpoints compare with `>`.
    ///
    /// Fails with [`ErrorKind::ConfigError`] when the day cutoff reaches before the earliest
    /// representable date.
    pub fn resolve(
        &self,
        descriptor: &TableSyncDescriptor,
        cutoff: SearchCutoff,
        checkpoint: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> SyncResult<ResolvedSearch> {
        let template = &descriptor.search_template;
        if !template.contains_watermark() {
            return Ok(ResolvedSearch {
                predicate: template.to_predicate(),
                since: None,
                until: None,
            });
        }

        let (since, operator) = match cutoff {
            SearchCutoff::DaysOld(days) => {
                let since = days_ago_start(&now, days).ok_or_else(|| {
                    sync_error!(
                        ErrorKind::ConfigError,
                        "Days-old cutoff is out of range",
                        format!("cannot look back {days} days from {now}")
                    )
                })?;
                (since, ">=")
            }
            SearchCutoff::Checkpoint => match checkpoint {
                Some(checkpoint) if descriptor.requires_day_subtraction => {
                    (previous_day_start(&checkpoint).unwrap_or(checkpoint), ">=")
                }
                Some(checkpoint) => (checkpoint, ">"),
                None if descriptor.requires_day_subtraction => (self.options.default_epoch, ">="),
                None => (self.options.default_epoch, ">"),
            },
        };

        let formatted_since = since.format(&self.options.timestamp_format).to_string();
        let until = self.options.window_days.map(|window| {
            since
                .checked_add_signed(Duration::days(i64::from(window)))
                .map_or(now, |end| end.min(now))
        });
        let replacement = match until {
            Some(end) => format!(
                "{formatted_since}{RANGE_SEPARATOR}{}",
                end.format(&self.options.timestamp_format)
            ),
            None => format!("{operator}{formatted_since}"),
        };

        Ok(ResolvedSearch {
            predicate: template.substitute(&replacement),
            since: Some(since),
            until,
        })
    }
}

/// Returns `true` when every destination resolved to the same predicate, so the source only
/// needs to be read once.
pub fn should_extract_once(searches: &[&SearchPredicate]) -> bool {
    match searches.split_first() {
        Some((first, rest)) => rest.iter().all(|search| search == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CANONICAL_TIMESTAMP_FORMAT;
    use std::collections::BTreeMap;

    fn ts(input: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(input, CANONICAL_TIMESTAMP_FORMAT).unwrap()
    }

    fn builder(window_days: Option<u32>) -> SearchBuilder {
        SearchBuilder::new(SearchOptions {
            timestamp_format: CANONICAL_TIMESTAMP_FORMAT.to_string(),
            default_epoch: ts("2020-01-01 00:00:00"),
            window_days,
        })
    }

    fn descriptor(groups: Vec<SearchGroup>, requires_day_subtraction: bool) -> TableSyncDescriptor {
        let template = SearchTemplate::new(groups);
        TableSyncDescriptor {
            source_table: "invoices".into(),
            dest_table: "invoices".into(),
            timestamp_field: TableSyncDescriptor::detect_timestamp_field(&template),
            search_template: template,
            column_map: BTreeMap::new(),
            primary_key: Some("id".into()),
            requires_day_subtraction,
            page_size: None,
            code_extraction: None,
        }
    }

    fn incremental(requires_day_subtraction: bool) -> TableSyncDescriptor {
        descriptor(
            vec![SearchGroup::new(vec![SearchCriterion::new(
                "modificationHostTimestamp",
                WATERMARK_PLACEHOLDER,
            )])],
            requires_day_subtraction,
        )
    }

    #[test]
    fn test_checkpoint_substitution_is_strict() {
        let resolved = builder(None).resolve(
            &incremental(false),
            SearchCutoff::Checkpoint,
            Some(ts("2024-01-01 00:00:00")),
            ts("2024-06-01 00:00:00"),
        ).unwrap();

        assert_eq!(
            resolved.predicate.criterion("modificationHostTimestamp"),
            Some(">2024-01-01 00:00:00")
        );
        assert_eq!(resolved.since, Some(ts("2024-01-01 00:00:00")));
    }

    #[test]
    fn test_day_subtraction_substitution_is_inclusive() {
        let resolved = builder(None).resolve(
            &incremental(true),
            SearchCutoff::Checkpoint,
            Some(ts("2024-01-01 00:00:00")),
            ts("2024-06-01 00:00:00"),
        ).unwrap();

        assert_eq!(
            resolved.predicate.criterion("modificationHostTimestamp"),
            Some(">=2023-12-31 00:00:00")
        );
    }

    #[test]
    fn test_missing_checkpoint_uses_default_epoch() {
        let resolved = builder(None).resolve(
            &incremental(false),
            SearchCutoff::Checkpoint,
            None,
            ts("2024-06-01 00:00:00"),
        ).unwrap();

        assert_eq!(
            resolved.predicate.criterion("modificationHostTimestamp"),
            Some(">2020-01-01 00:00:00")
        );
    }

    #[test]
    fn test_days_old_cutoff() {
        let resolved = builder(None).resolve(
            &incremental(false),
            SearchCutoff::DaysOld(7),
            Some(ts("2024-05-30 10:00:00")),
            ts("2024-06-01 12:30:00"),
        ).unwrap();

        assert_eq!(
            resolved.predicate.criterion("modificationHostTimestamp"),
            Some(">=2024-05-25 00:00:00")
        );
    }

    #[test]
    fn test_window_days_renders_range_capped_at_now() {
        let resolved = builder(Some(30)).resolve(
            &incremental(false),
            SearchCutoff::Checkpoint,
            Some(ts("2024-05-20 00:00:00")),
            ts("2024-06-01 00:00:00"),
        ).unwrap();

        assert_eq!(
            resolved.predicate.criterion("modificationHostTimestamp"),
            Some("2024-05-20 00:00:00...2024-06-01 00:00:00")
        );
    }

    #[test]
    fn test_window_end_is_reported() {
        let resolved = builder(Some(30))
            .resolve(
                &incremental(false),
                SearchCutoff::Checkpoint,
                Some(ts("2024-01-01 00:00:00")),
                ts("2024-06-01 00:00:00"),
            )
            .unwrap();

        assert_eq!(resolved.since, Some(ts("2024-01-01 00:00:00")));
        assert_eq!(resolved.until, Some(ts("2024-01-31 00:00:00")));

        let unwindowed = builder(None)
            .resolve(
                &incremental(false),
                SearchCutoff::Checkpoint,
                Some(ts("2024-01-01 00:00:00")),
                ts("2024-06-01 00:00:00"),
            )
            .unwrap();
        assert_eq!(unwindowed.until, None);
    }

    #[test]
    fn test_oversized_window_is_capped_at_now() {
        let resolved = builder(Some(u32::MAX))
            .resolve(
                &incremental(false),
                SearchCutoff::Checkpoint,
                Some(ts("2024-01-01 00:00:00")),
                ts("2024-06-01 00:00:00"),
            )
            .unwrap();

        assert_eq!(resolved.until, Some(ts("2024-06-01 00:00:00")));
    }

    #[test]
    fn test_out_of_range_days_old_is_a_config_error() {
        let err = builder(None)
            .resolve(
                &incremental(false),
                SearchCutoff::DaysOld(200_000_000),
                None,
                ts("2024-06-01 00:00:00"),
            )
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn test_non_incremental_template_is_unchanged() {
        let table = descriptor(
            vec![SearchGroup::new(vec![SearchCriterion::new("category", "=Payer")])],
            false,
        );
        let resolved = builder(None).resolve(
            &table,
            SearchCutoff::Checkpoint,
            Some(ts("2024-01-01 00:00:00")),
            ts("2024-06-01 00:00:00"),
        ).unwrap();

        assert!(!table.is_timestamp_incremental());
        assert_eq!(resolved.predicate.criterion("category"), Some("=Payer"));
        assert_eq!(resolved.since, None);
    }

    #[test]
    fn test_omit_groups_are_preserved() {
        let table = descriptor(
            vec![
                SearchGroup::new(vec![
                    SearchCriterion::new("modificationHostTimestamp", WATERMARK_PLACEHOLDER),
                    SearchCriterion::new("type", "=therapist"),
                ]),
                SearchGroup::omitted(vec![SearchCriterion::new("nameFull", "=")]),
            ],
            false,
        );
        let resolved = builder(None).resolve(
            &table,
            SearchCutoff::Checkpoint,
            Some(ts("2024-01-01 00:00:00")),
            ts("2024-06-01 00:00:00"),
        ).unwrap();

        assert_eq!(
            resolved.predicate.to_json(),
            serde_json::json!([
                {"modificationHostTimestamp": ">2024-01-01 00:00:00", "type": "=therapist"},
                {"nameFull": "=", "omit": "true"}
            ])
        );
    }

    #[test]
    fn test_should_extract_once() {
        let a = SearchPredicate::new(vec![SearchGroup::new(vec![SearchCriterion::new(
            "id", "> 0",
        )])]);
        let b = SearchPredicate::new(vec![SearchGroup::new(vec![SearchCriterion::new(
            "id", "> 1",
        )])]);

        assert!(should_extract_once(&[&a, &a]));
        assert!(!should_extract_once(&[&a, &b]));
        assert!(should_extract_once(&[&a]));
        assert!(should_extract_once(&[]));
    }

    #[test]
    fn test_options_from_config() {
        let options = SearchOptions::from_config(&SearchConfig::default()).unwrap();
        assert_eq!(options.default_epoch, ts("2020-01-01 00:00:00"));
        assert_eq!(options.timestamp_format, "%m/%d/%Y %H:%M:%S");

        let invalid = SearchConfig {
            default_epoch: "yesterday".into(),
            ..SearchConfig::default()
        };
        assert_eq!(
            SearchOptions::from_config(&invalid).unwrap_err().kind(),
            ErrorKind::ConfigError
        );
    }
}

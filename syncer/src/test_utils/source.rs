use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::Mutex;

use crate::concurrency::shutdown::ShutdownTx;
use crate::error::{ErrorKind, SyncResult};
use crate::search::{SearchCriterion, SearchGroup, SearchPredicate};
use crate::source::{PageRequest, SourceClient, SortOrder};
use crate::sync_error;
use crate::types::{Record, Value, parse_timestamp};

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, Vec<Record>>,
    requests: Vec<PageRequest>,
    failures: VecDeque<ErrorKind>,
    /// Tables whose every fetch fails.
    failing_tables: BTreeMap<String, ErrorKind>,
    /// Shutdown is requested once this many pages were served.
    shutdown_after: Option<(usize, ShutdownTx)>,
}

/// In-memory [`SourceClient`] that answers find requests over stored records.
///
/// Criteria are evaluated the way the source evaluates them: `*` matches any non-empty value,
/// `>`, `>=`, `<`, `<=` and `=` compare timestamps when both sides parse as one, and
/// `start...end` is an inclusive range. Clones share the same tables and request log.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the records of `table`.
    pub async fn set_records(&self, table: &str, records: Vec<Record>) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(table.to_string(), records);
    }

    pub async fn push_record(&self, table: &str, record: Record) {
        let mut inner = self.inner.lock().await;
        inner.tables.entry(table.to_string()).or_default().push(record);
    }

    /// Every request served so far, in order.
    pub async fn requests(&self) -> Vec<PageRequest> {
        let inner = self.inner.lock().await;
        inner.requests.clone()
    }

    pub async fn requests_for(&self, table: &str) -> Vec<PageRequest> {
        let inner = self.inner.lock().await;
        inner
            .requests
            .iter()
            .filter(|request| request.table == table)
            .cloned()
            .collect()
    }

    /// Makes the next fetch fail with `kind`.
    pub async fn fail_next_fetch(&self, kind: ErrorKind) {
        let mut inner = self.inner.lock().await;
        inner.failures.push_back(kind);
    }

    /// Makes every fetch of `table` fail with `kind`.
    pub async fn fail_table(&self, table: &str, kind: ErrorKind) {
        let mut inner = self.inner.lock().await;
        inner.failing_tables.insert(table.to_string(), kind);
    }

    /// Requests shutdown through `tx` right after the `pages`-th page is served.
    pub async fn shutdown_after(&self, pages: usize, tx: ShutdownTx) {
        let mut inner = self.inner.lock().await;
        inner.shutdown_after = Some((pages, tx));
    }
}

#[async_trait]
impl SourceClient for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_page(&self, request: &PageRequest) -> SyncResult<Vec<Record>> {
        let mut inner = self.inner.lock().await;
        inner.requests.push(request.clone());

        if let Some(kind) = inner.failures.pop_front() {
            return Err(sync_error!(kind, "Scripted source failure"));
        }
        if let Some(&kind) = inner.failing_tables.get(&request.table) {
            return Err(sync_error!(
                kind,
                "Scripted source failure",
                format!("table `{}`", request.table)
            ));
        }

        let mut matched: Vec<Record> = inner
            .tables
            .get(&request.table)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| matches_predicate(record, &request.predicate))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(sort) = &request.sort {
            matched.sort_by(|a, b| {
                let ordering = compare_values(a.get(&sort.field), b.get(&sort.field));
                match sort.order {
                    SortOrder::Ascend => ordering,
                    SortOrder::Descend => ordering.reverse(),
                }
            });
        }

        let page: Vec<Record> = matched
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();

        let served = inner.requests.len();
        if let Some((pages, tx)) = &inner.shutdown_after {
            if served >= *pages {
                tx.shutdown();
            }
        }

        Ok(page)
    }
}

/// A record matches when it matches any find group (or there are none) and no omit group.
fn matches_predicate(record: &Record, predicate: &SearchPredicate) -> bool {
    let (omitted, found): (Vec<&SearchGroup>, Vec<&SearchGroup>) =
        predicate.groups().iter().partition(|group| group.omit);

    let included = found.is_empty() || found.iter().any(|group| matches_group(record, group));
    let excluded = omitted.iter().any(|group| matches_group(record, group));

    included && !excluded
}

fn matches_group(record: &Record, group: &SearchGroup) -> bool {
    group
        .criteria
        .iter()
        .all(|criterion| matches_criterion(record, criterion))
}

fn matches_criterion(record: &Record, criterion: &SearchCriterion) -> bool {
    let Some(value) = record.get(&criterion.field).and_then(Value::render) else {
        return false;
    };
    let value = value.as_ref();
    let expected = criterion.value.trim();

    if expected == "*" {
        return !value.is_empty();
    }
    if let Some((start, end)) = expected.split_once("...") {
        return compare_text(value, start) != Ordering::Less
            && compare_text(value, end) != Ordering::Greater;
    }

    for (operator, accepts) in [
        (">=", &[Ordering::Greater, Ordering::Equal][..]),
        ("<=", &[Ordering::Less, Ordering::Equal][..]),
        (">", &[Ordering::Greater][..]),
        ("<", &[Ordering::Less][..]),
        ("=", &[Ordering::Equal][..]),
    ] {
        if let Some(bound) = expected.strip_prefix(operator) {
            return accepts.contains(&compare_text(value, bound));
        }
    }

    compare_text(value, expected) == Ordering::Equal
}

fn compare_text(left: &str, right: &str) -> Ordering {
    match (timestamp(left), timestamp(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => left.trim().cmp(right.trim()),
    }
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let render = |value: Option<&Value>| value.and_then(Value::render).map(|v| v.into_owned());
    match (render(left), render(right)) {
        (Some(left), Some(right)) => compare_text(&left, &right),
        (left, right) => left.cmp(&right),
    }
}

fn timestamp(value: &str) -> Option<NaiveDateTime> {
    parse_timestamp(value)
}

//! Drives one sync run: table by table, page by page, into every targeted destination.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::audit::{AuditLogEntry, AuditLogger};
use crate::concurrency::shutdown::{ShutdownRx, is_shutdown_requested};
use crate::destination::Loader;
use crate::error::{SyncError, SyncResult};
use crate::mapping::FieldMapper;
use crate::report::{DestinationReport, RunSummary, TableReport};
use crate::search::{SearchBuilder, SearchCutoff, SearchPredicate, should_extract_once};
use crate::source::{PageRequest, SortSpec, SourceClient};
use crate::state::table::TableSyncPhase;
use crate::store::checkpoint::CheckpointStore;
use crate::types::{DestinationKind, LoadTarget, Record, TableSyncDescriptor, parse_timestamp};

/// Page size used when neither the table nor the run sets one.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Table selection and cutoff of one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Destination table names to sync. Empty means every configured table.
    pub tables: Vec<String>,
    /// Table names to skip, compared case-insensitively.
    pub ignore: Vec<String>,
    /// Look back this many days instead of reading checkpoints. Checkpoints are left untouched.
    pub days_old: Option<u32>,
}

impl RunOptions {
    pub fn cutoff(&self) -> SearchCutoff {
        match self.days_old {
            Some(days) => SearchCutoff::DaysOld(days),
            None => SearchCutoff::Checkpoint,
        }
    }

    /// Returns `true` when `descriptor` takes part in the run.
    pub fn selects(&self, descriptor: &TableSyncDescriptor) -> bool {
        let named = |name: &String| {
            name.eq_ignore_ascii_case(&descriptor.dest_table)
                || name.eq_ignore_ascii_case(&descriptor.source_table)
        };

        if self.ignore.iter().any(named) {
            return false;
        }

        self.tables.is_empty() || self.tables.iter().any(named)
    }

    fn advances_checkpoints(&self) -> bool {
        self.days_old.is_none()
    }
}

/// Run-wide settings shared by every table.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub search: SearchBuilder,
    pub default_page_size: usize,
    pub audit: AuditLogger,
    pub options: RunOptions,
}

/// A destination taking part in the run, with its own checkpoints.
#[derive(Debug)]
pub struct SyncDestination {
    pub kind: DestinationKind,
    pub loader: Box<dyn Loader>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl SyncDestination {
    pub fn new<L>(loader: L, checkpoints: Arc<dyn CheckpointStore>) -> Self
    where
        L: Loader + 'static,
    {
        Self {
            kind: loader.kind(),
            loader: Box::new(loader),
            checkpoints,
        }
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Progress of one table on one destination.
#[derive(Debug)]
struct DestinationProgress {
    report: DestinationReport,
    predicate: Option<SearchPredicate>,
    /// End of the search window, when the search is windowed.
    until: Option<NaiveDateTime>,
    /// Latest timestamp loaded so far.
    latest: Option<NaiveDateTime>,
    /// Set once the source reported the end of the data for this destination's search.
    exhausted: bool,
}

impl DestinationProgress {
    fn new(kind: DestinationKind) -> Self {
        Self {
            report: DestinationReport::new(kind),
            predicate: None,
            until: None,
            latest: None,
            exhausted: false,
        }
    }

    fn is_failed(&self) -> bool {
        self.report.is_failed()
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.report.phase = TableSyncPhase::Failed(reason.into());
    }

    fn failure(&self) -> Option<&str> {
        match &self.report.phase {
            TableSyncPhase::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    cancelled: bool,
    /// Set once the source answered a fetch, after which setup errors only fail their table.
    past_setup: bool,
}

/// Synchronizes configured tables from a source into every registered destination.
///
/// Tables are processed one at a time. Destinations whose searches resolve to the same
/// predicate share a single extraction pass; otherwise each gets its own. A failure on one
/// destination never stops the other, and a destination's checkpoint only moves when every
/// page of the table was loaded into it.
#[derive(Debug)]
pub struct SyncOrchestrator<S> {
    source: S,
    descriptors: Vec<TableSyncDescriptor>,
    destinations: Vec<SyncDestination>,
    context: SyncContext,
    shutdown_rx: ShutdownRx,
    clock: fn() -> NaiveDateTime,
}

impl<S> SyncOrchestrator<S>
where
    S: SourceClient,
{
    pub fn new(
        source: S,
        descriptors: Vec<TableSyncDescriptor>,
        context: SyncContext,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            source,
            descriptors,
            destinations: Vec::new(),
            context,
            shutdown_rx,
            clock: local_now,
        }
    }

    pub fn with_destination(mut self, destination: SyncDestination) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Replaces the clock used for cutoffs, fallback checkpoints and audit timestamps.
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn destination_kinds(&self) -> Vec<DestinationKind> {
        self.destinations.iter().map(|d| d.kind).collect()
    }

    /// Runs every selected table and returns the summary.
    ///
    /// Errors are returned only for connection and configuration failures raised before the
    /// source answered its first request, even with an empty page. Everything after that is
    /// recorded per table in the summary.
    pub async fn run(&mut self) -> SyncResult<RunSummary> {
        let started = Instant::now();
        let mut state = RunState::default();
        let mut summary = RunSummary::default();

        let descriptors: Vec<TableSyncDescriptor> = self
            .descriptors
            .iter()
            .filter(|descriptor| self.context.options.selects(descriptor))
            .cloned()
            .collect();

        for name in &self.context.options.tables {
            let known = descriptors.iter().any(|d| {
                name.eq_ignore_ascii_case(&d.dest_table) || name.eq_ignore_ascii_case(&d.source_table)
            });
            if !known {
                warn!(table = %name, "requested table is not configured or is ignored");
            }
        }

        info!(
            source = self.source.name(),
            tables = descriptors.len(),
            destinations = ?self.destination_kinds(),
            days_old = ?self.context.options.days_old,
            "starting sync run"
        );

        for descriptor in &descriptors {
            if is_shutdown_requested(&self.shutdown_rx) {
                info!("shutdown requested, not starting further tables");
                state.cancelled = true;
                break;
            }

            let span = info_span!(
                "table_sync",
                source_table = %descriptor.source_table,
                table = %descriptor.dest_table
            );
            let report = self
                .sync_table(descriptor, &mut state)
                .instrument(span)
                .await?;
            summary.tables.push(report);

            if state.cancelled {
                break;
            }
        }

        summary.cancelled = state.cancelled;
        summary.elapsed = started.elapsed();

        info!(
            tables = summary.tables.len(),
            failed = summary.failed_tables().count(),
            records = summary.total_read(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            cancelled = summary.cancelled,
            "sync run finished"
        );

        Ok(summary)
    }

    async fn sync_table(
        &mut self,
        descriptor: &TableSyncDescriptor,
        state: &mut RunState,
    ) -> SyncResult<TableReport> {
        let started = Instant::now();
        let now = (self.clock)();
        let target = LoadTarget::for_descriptor(descriptor);
        let cutoff = self.context.options.cutoff();

        let mut progress = Vec::with_capacity(self.destinations.len());
        for (kind, store) in self.checkpoint_stores() {
            let mut entry = DestinationProgress::new(kind);
            match self
                .context
                .search
                .build(descriptor, cutoff, store.as_ref(), now)
                .await
            {
                Ok(resolved) => {
                    entry.predicate = Some(resolved.predicate);
                    entry.until = resolved.until;
                }
                Err(err) if err.kind().is_setup_fatal() && !state.past_setup => {
                    return Err(err);
                }
                Err(err) => {
                    warn!(destination = %kind, error = %err, "failed to build search");
                    entry.fail(err.to_string());
                }
            }
            progress.push(entry);
        }

        let passes = group_by_predicate(&progress);
        let searches: Vec<&SearchPredicate> =
            progress.iter().filter_map(|p| p.predicate.as_ref()).collect();
        if searches.len() > 1 && should_extract_once(&searches) {
            debug!("destinations share one search, extracting once");
        }

        // Separate passes read overlapping ranges of the same source table.
        let mut records_read = 0;
        for (predicate, members) in &passes {
            let read = self
                .extract(descriptor, &target, predicate, members, &mut progress, state)
                .await?;
            records_read = records_read.max(read);
        }

        let elapsed = started.elapsed();
        for (index, entry) in progress.iter_mut().enumerate() {
            self.finish(descriptor, index, entry, now, elapsed.as_secs_f64())
                .await;
        }

        let report = TableReport {
            source_table: descriptor.source_table.clone(),
            dest_table: descriptor.dest_table.clone(),
            records_read,
            extraction_passes: passes.len(),
            elapsed: started.elapsed(),
            destinations: progress.into_iter().map(|p| p.report).collect(),
        };

        for destination in &report.destinations {
            info!(table = %report.dest_table, "{destination}");
        }

        Ok(report)
    }

    /// Reads every page of `predicate` and loads it into the destinations in `members`.
    ///
    /// Returns the number of records read.
    async fn extract(
        &mut self,
        descriptor: &TableSyncDescriptor,
        target: &LoadTarget,
        predicate: &SearchPredicate,
        members: &[usize],
        progress: &mut [DestinationProgress],
        state: &mut RunState,
    ) -> SyncResult<u64> {
        let mapper = FieldMapper::new(&descriptor.column_map);
        let timestamp_column = descriptor.timestamp_column();
        let mut request = PageRequest {
            table: descriptor.source_table.clone(),
            predicate: predicate.clone(),
            limit: descriptor.page_size(self.context.default_page_size),
            offset: 0,
            sort: descriptor
                .is_timestamp_incremental()
                .then(|| SortSpec::ascending(descriptor.timestamp_field.as_str())),
        };
        let mut read = 0u64;

        loop {
            if members.iter().all(|&index| progress[index].is_failed()) {
                break;
            }
            if is_shutdown_requested(&self.shutdown_rx) {
                info!(offset = request.offset, "shutdown requested, stopping extraction");
                state.cancelled = true;
                break;
            }

            for &index in members {
                if !progress[index].is_failed() {
                    progress[index].report.phase = TableSyncPhase::Extracting;
                }
            }

            let page = match self.source.fetch_page(&request).await {
                Ok(page) => page,
                Err(err) if err.kind().is_setup_fatal() && !state.past_setup => {
                    return Err(err);
                }
                Err(err) => {
                    warn!(offset = request.offset, error = %err, "failed to fetch page");
                    for &index in members {
                        if !progress[index].is_failed() {
                            progress[index].fail(err.to_string());
                        }
                    }
                    break;
                }
            };

            state.past_setup = true;
            let page_len = page.len();
            read += page_len as u64;
            debug!(offset = request.offset, records = page_len, "fetched page");

            if page.is_empty() {
                mark_exhausted(members, progress);
                break;
            }

            let mut batch = mapper.map_batch(page);
            if let Some(extraction) = &descriptor.code_extraction {
                for record in &mut batch {
                    extraction.apply(record);
                }
            }
            let latest = latest_timestamp(&batch, timestamp_column);

            for &index in members {
                let entry = &mut progress[index];
                if entry.is_failed() {
                    continue;
                }

                let destination = &mut self.destinations[index];
                entry.report.phase = TableSyncPhase::Loading(destination.kind);
                let load_started = Instant::now();
                let result = destination.loader.load_batch(target, &batch).await;
                entry.report.elapsed += load_started.elapsed();

                match result {
                    Ok(counts) => {
                        debug!(destination = %destination.kind, %counts, "loaded batch");
                        entry.report.counts.merge(&counts);
                        entry.latest = entry.latest.max(latest);
                    }
                    Err(err) => {
                        warn!(destination = %destination.kind, error = %err, "failed to load batch");
                        entry.fail(err.to_string());
                    }
                }
            }

            if page_len < request.limit {
                mark_exhausted(members, progress);
                break;
            }
            request = request.next_page();
        }

        Ok(read)
    }

    /// Advances the checkpoint and writes the audit entry of one destination.
    async fn finish(
        &mut self,
        descriptor: &TableSyncDescriptor,
        index: usize,
        entry: &mut DestinationProgress,
        now: NaiveDateTime,
        timelapse: f64,
    ) {
        let counts = entry.report.counts;
        if !entry.is_failed() && counts.failed > 0 {
            entry.fail(format!(
                "{} of {} records failed to load",
                counts.failed, counts.input
            ));
        }

        let processed = counts.input > 0;
        let destination = &mut self.destinations[index];

        // A fully read window moves the checkpoint to its end even when it held no records.
        let window_end = entry.until.filter(|_| entry.exhausted);

        if !entry.is_failed()
            && (processed || window_end.is_some())
            && descriptor.is_timestamp_incremental()
            && self.context.options.advances_checkpoints()
        {
            entry.report.phase = TableSyncPhase::CheckpointAdvance;
            let candidate = window_end.or(entry.latest).unwrap_or(now);
            match destination
                .checkpoints
                .advance_checkpoint(&descriptor.dest_table, candidate)
                .await
            {
                Ok(stored) => {
                    debug!(destination = %destination.kind, checkpoint = %stored, "advanced checkpoint");
                    entry.report.checkpoint = Some(stored);
                }
                Err(err) => {
                    warn!(destination = %destination.kind, error = %err, "failed to advance checkpoint");
                    entry.fail(err.to_string());
                }
            }
        }

        if processed {
            let audit_entry = AuditLogEntry {
                data_table: descriptor.dest_table.clone(),
                destination: destination.kind,
                counts,
                date_modified: entry.report.checkpoint,
                date_time: (self.clock)(),
                timelapse,
                error_message: entry.failure().map(str::to_string),
            };

            // Audit failures are logged by the logger and never fail the table.
            if self
                .context
                .audit
                .write(destination.loader.as_mut(), &audit_entry)
                .await
                .is_ok()
                && self.context.audit.is_enabled()
                && !entry.is_failed()
            {
                entry.report.phase = TableSyncPhase::LogWritten;
            }
        }

        if !entry.is_failed() {
            entry.report.phase = TableSyncPhase::Done;
        }
    }

    /// Archives the checkpoints of every destination.
    pub async fn archive_checkpoints(&self) -> SyncResult<Vec<(DestinationKind, Option<String>)>> {
        let now = (self.clock)();
        let mut archived = Vec::with_capacity(self.destinations.len());
        for (kind, store) in self.checkpoint_stores() {
            let name = store.archive_checkpoints(now).await?;
            info!(destination = %kind, archive = ?name, "archived checkpoints");
            archived.push((kind, name));
        }

        Ok(archived)
    }

    /// Deletes the checkpoints of every destination.
    pub async fn reset_checkpoints(&self) -> SyncResult<()> {
        for (kind, store) in self.checkpoint_stores() {
            store.reset_checkpoints().await?;
            info!(destination = %kind, "reset checkpoints");
        }

        Ok(())
    }

    fn checkpoint_stores(&self) -> Vec<(DestinationKind, Arc<dyn CheckpointStore>)> {
        self.destinations
            .iter()
            .map(|d| (d.kind, Arc::clone(&d.checkpoints)))
            .collect()
    }

    /// Closes every destination and the source session.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        let mut errors: Vec<SyncError> = Vec::new();
        for destination in &mut self.destinations {
            if let Err(err) = destination.loader.shutdown().await {
                warn!(destination = %destination.kind, error = %err, "failed to shut down destination");
                errors.push(err);
            }
        }
        if let Err(err) = self.source.close().await {
            warn!(source = self.source.name(), error = %err, "failed to close source session");
            errors.push(err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

fn mark_exhausted(members: &[usize], progress: &mut [DestinationProgress]) {
    for &index in members {
        progress[index].exhausted = true;
    }
}

/// Groups destinations sharing the same predicate, in destination order.
fn group_by_predicate(progress: &[DestinationProgress]) -> Vec<(SearchPredicate, Vec<usize>)> {
    let mut passes: Vec<(SearchPredicate, Vec<usize>)> = Vec::new();
    for (index, entry) in progress.iter().enumerate() {
        let Some(predicate) = &entry.predicate else {
            continue;
        };
        match passes.iter_mut().find(|(existing, _)| existing == predicate) {
            Some((_, members)) => members.push(index),
            None => passes.push((predicate.clone(), vec![index])),
        }
    }

    passes
}

/// Latest parseable timestamp of `column` in `batch`.
fn latest_timestamp(batch: &[Record], column: &str) -> Option<NaiveDateTime> {
    batch
        .iter()
        .filter_map(|record| record.get(column))
        .filter_map(|value| value.as_str().and_then(parse_timestamp))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::search::{SearchCriterion, SearchGroup, SearchTemplate};
    use std::collections::BTreeMap;

    fn descriptor(source: &str, dest: &str) -> TableSyncDescriptor {
        TableSyncDescriptor {
            source_table: source.into(),
            dest_table: dest.into(),
            search_template: SearchTemplate::new(vec![SearchGroup::new(vec![
                SearchCriterion::new("id", "*"),
            ])]),
            column_map: BTreeMap::new(),
            primary_key: Some("id".into()),
            requires_day_subtraction: false,
            page_size: None,
            timestamp_field: "modificationHostTimestamp".into(),
            code_extraction: None,
        }
    }

    #[test]
    fn test_selection_honours_allow_and_ignore_lists() {
        let invoices = descriptor("Invoices", "invoices");
        let patients = descriptor("Patients", "patients");

        let all = RunOptions::default();
        assert!(all.selects(&invoices));

        let only = RunOptions {
            tables: vec!["INVOICES".into()],
            ..RunOptions::default()
        };
        assert!(only.selects(&invoices));
        assert!(!only.selects(&patients));

        let ignoring = RunOptions {
            ignore: vec!["Patients".into()],
            ..RunOptions::default()
        };
        assert!(ignoring.selects(&invoices));
        assert!(!ignoring.selects(&patients));
    }

    #[test]
    fn test_days_old_uses_fixed_cutoff() {
        let options = RunOptions {
            days_old: Some(3),
            ..RunOptions::default()
        };

        assert_eq!(options.cutoff(), SearchCutoff::DaysOld(3));
        assert!(!options.advances_checkpoints());
        assert_eq!(RunOptions::default().cutoff(), SearchCutoff::Checkpoint);
    }

    #[test]
    fn test_latest_timestamp_skips_unparseable_values() {
        let batch = vec![
            record! { "ts" => "01/02/2024 10:00:00" },
            record! { "ts" => "not a date" },
            record! { "ts" => "2024-01-03 08:00:00" },
            record! { "other" => 1i64 },
        ];

        let latest = latest_timestamp(&batch, "ts").unwrap();

        assert_eq!(latest.to_string(), "2024-01-03 08:00:00");
        assert_eq!(latest_timestamp(&[], "ts"), None);
    }
}

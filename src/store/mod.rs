//! Date-partitioned trend store.
//!
//! Records live in one Markdown file per save date:
//!
//! ```text
//! <base_path>/<profile>/trends/
//! ├── 2025-05-05.md
//! └── 2025-05-06.md
//! ```
//!
//! The partition is chosen by the caller-supplied `as_of` date, never by the
//! record's own timestamp. Saving merges by record id into that day's file.
//! Reads walk partitions in ascending date order and concatenate them; a
//! partition that fails to decode is skipped on reads but blocks writes to
//! it, so a damaged file is never silently overwritten.
//!
//! Writers are serialized through one async mutex per store, and every
//! rewrite goes through a temporary file and a rename.

pub mod partition;

use crate::error::{Error, Result};
use crate::models::Trend;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// One page of results plus the pre-pagination match count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records in storage order, already clipped to `offset`/`limit`.
    pub items: Vec<Trend>,
    /// Number of matching records before pagination.
    pub total: usize,
}

/// Pagination and filtering for [`TrendRepository::list`] and
/// [`TrendRepository::find_by_date`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Maximum records returned; `0` means unbounded.
    pub limit: usize,
    /// Records skipped before the page starts. Past the end yields an empty page.
    pub offset: usize,
    /// Only records whose `source_id` equals this.
    pub source: Option<String>,
}

/// Filters applied by [`TrendRepository::search`] on top of the text query.
///
/// Every filter left at its default admits all records.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Maximum records returned; `0` means unbounded.
    pub limit: usize,
    pub offset: usize,
    /// Only these source ids (empty: any).
    pub sources: Vec<String>,
    /// Records carrying at least one of these tags (empty: any).
    pub tags: Vec<String>,
    /// Only starred (`Some(true)`) or unstarred (`Some(false)`) records.
    pub starred: Option<bool>,
    /// Inclusive partition-date bounds.
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl SearchOptions {
    fn admits(&self, date: NaiveDate, trend: &Trend) -> bool {
        self.date_from.is_none_or(|from| date >= from)
            && self.date_to.is_none_or(|to| date <= to)
            && (self.sources.is_empty() || self.sources.contains(&trend.source_id))
            && (self.tags.is_empty() || trend.tags.iter().any(|t| self.tags.contains(t)))
            && self.starred.is_none_or(|starred| trend.starred == starred)
    }
}

/// Persistence contract used by the orchestrator and the services.
#[async_trait]
pub trait TrendRepository: Send + Sync {
    /// Merge a batch of trends into one day's partition.
    ///
    /// Records are matched by `id`: a record already present in the `as_of`
    /// partition is replaced in place, new records are appended in batch
    /// order. Other partitions are never touched, so the same id may live in
    /// several days.
    ///
    /// # Arguments
    ///
    /// * `trends` - The records to persist; an empty slice is a no-op
    /// * `as_of` - Partition date, independent of the records' own timestamps
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] when the existing partition cannot be read
    /// back (it is left untouched), or an I/O error if the rewrite fails.
    async fn save_batch(&self, trends: &[Trend], as_of: NaiveDate) -> Result<()>;

    /// Every stored record, partitions in ascending date order.
    async fn list(&self, opts: &ListOptions) -> Result<Page>;

    /// The record with `id` from the newest partition holding it, or
    /// [`Error::NotFound`].
    async fn find_by_id(&self, id: &str) -> Result<Trend>;
    /// A date with no partition is an empty page, not an error.
    async fn find_by_date(&self, date: NaiveDate, opts: &ListOptions) -> Result<Page>;
    /// Case-insensitive substring match on title and summary.
    async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Page>;
    /// Replace the stored record with the same id, in place.
    async fn update(&self, trend: &Trend) -> Result<()>;

    /// Remove the record from the partition holding it. Missing ids are
    /// [`Error::NotFound`].
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Markdown-file implementation of [`TrendRepository`].
#[derive(Debug)]
pub struct TrendStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TrendStore {
    /// Store rooted at `<base_path>/<profile>/trends`. Nothing is created
    /// until the first write.
    pub fn new(base_path: impl AsRef<Path>, profile: &str) -> Self {
        Self {
            dir: base_path.as_ref().join(profile).join("trends"),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory holding the partition files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    /// Partition dates present on disk, ascending.
    async fn partition_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut dates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "md") {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
            match parsed {
                Some(date) => dates.push(date),
                None => debug!(path = %path.display(), "Ignoring non-partition file"),
            }
        }
        dates.sort();
        Ok(dates)
    }

    /// `None` when the partition does not exist.
    async fn read_partition(&self, date: NaiveDate) -> Result<Option<Vec<Trend>>> {
        let path = self.partition_path(date);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (_, trends) = partition::decode(&content).map_err(|e| match e {
            Error::Decode(msg) => Error::Decode(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        Ok(Some(trends))
    }

    async fn write_partition(&self, date: NaiveDate, trends: &[Trend]) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.partition_path(date);
        let tmp = path.with_extension("md.tmp");
        fs::write(&tmp, partition::encode(date, trends)?).await?;
        fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), count = trends.len(), "Wrote partition");
        Ok(())
    }

    /// Every readable partition, ascending. Undecodable ones are skipped.
    async fn load_all(&self) -> Result<Vec<(NaiveDate, Vec<Trend>)>> {
        let mut partitions = Vec::new();
        for date in self.partition_dates().await? {
            match self.read_partition(date).await {
                Ok(Some(trends)) => partitions.push((date, trends)),
                Ok(None) => {}
                Err(e) => warn!(%date, error = %e, "Skipping unreadable partition"),
            }
        }
        Ok(partitions)
    }

    /// Newest partition holding `id`, with the record's position in it.
    async fn locate(&self, id: &str) -> Result<Option<(NaiveDate, Vec<Trend>, usize)>> {
        for date in self.partition_dates().await?.into_iter().rev() {
            match self.read_partition(date).await {
                Ok(Some(trends)) => {
                    if let Some(pos) = trends.iter().position(|t| t.id == id) {
                        return Ok(Some((date, trends, pos)));
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(%date, error = %e, "Skipping unreadable partition"),
            }
        }
        Ok(None)
    }
}

/// Clip `(offset, limit)` to bounds; `limit == 0` is unbounded.
pub fn paginate(items: Vec<Trend>, offset: usize, limit: usize) -> Page {
    let total = items.len();
    let start = offset.min(total);
    let take = if limit == 0 { total - start } else { limit.min(total - start) };
    Page {
        items: items.into_iter().skip(start).take(take).collect(),
        total,
    }
}

/// Overlay `incoming` onto `existing` by id. Existing records keep their
/// position, colliding ones are replaced in place, new ones are appended in
/// batch order.
pub fn merge_by_id(mut existing: Vec<Trend>, incoming: &[Trend]) -> Vec<Trend> {
    let mut index: HashMap<String, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.clone(), i))
        .collect();
    for trend in incoming {
        match index.get(&trend.id) {
            Some(&pos) => existing[pos] = trend.clone(),
            None => {
                index.insert(trend.id.clone(), existing.len());
                existing.push(trend.clone());
            }
        }
    }
    existing
}

#[async_trait]
impl TrendRepository for TrendStore {
    #[instrument(level = "info", skip_all, fields(count = trends.len(), %as_of))]
    async fn save_batch(&self, trends: &[Trend], as_of: NaiveDate) -> Result<()> {
        if trends.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let existing = self.read_partition(as_of).await?.unwrap_or_default();
        let before = existing.len();
        let merged = merge_by_id(existing, trends);
        self.write_partition(as_of, &merged).await?;
        info!(before, after = merged.len(), "Saved batch");
        Ok(())
    }

    async fn list(&self, opts: &ListOptions) -> Result<Page> {
        let trends: Vec<Trend> = self
            .load_all()
            .await?
            .into_iter()
            .flat_map(|(_, trends)| trends)
            .filter(|t| opts.source.as_ref().is_none_or(|s| &t.source_id == s))
            .collect();
        Ok(paginate(trends, opts.offset, opts.limit))
    }

    async fn find_by_id(&self, id: &str) -> Result<Trend> {
        match self.locate(id).await? {
            Some((_, mut trends, pos)) => Ok(trends.swap_remove(pos)),
            None => Err(Error::not_found("trend", id)),
        }
    }

    async fn find_by_date(&self, date: NaiveDate, opts: &ListOptions) -> Result<Page> {
        let trends: Vec<Trend> = self
            .read_partition(date)
            .await?
            .unwrap_or_default()
            .into_iter()
            .filter(|t| opts.source.as_ref().is_none_or(|s| &t.source_id == s))
            .collect();
        Ok(paginate(trends, opts.offset, opts.limit))
    }

    #[instrument(level = "debug", skip(self, opts))]
    async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Page> {
        let needle = query.trim().to_lowercase();
        let matches: Vec<Trend> = self
            .load_all()
            .await?
            .into_iter()
            .flat_map(|(date, trends)| {
                trends
                    .into_iter()
                    .filter(move |t| opts.admits(date, t))
            })
            .filter(|t| t.matches_query(&needle))
            .collect();
        debug!(matches = matches.len(), "Search complete");
        Ok(paginate(matches, opts.offset, opts.limit))
    }

    #[instrument(level = "info", skip_all, fields(id = %trend.id))]
    async fn update(&self, trend: &Trend) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (date, mut trends, pos) = self
            .locate(&trend.id)
            .await?
            .ok_or_else(|| Error::not_found("trend", &trend.id))?;
        trends[pos] = trend.clone();
        self.write_partition(date, &trends).await
    }

    #[instrument(level = "info", skip(self))]
    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (date, mut trends, pos) = self
            .locate(id)
            .await?
            .ok_or_else(|| Error::not_found("trend", id))?;
        trends.remove(pos);
        self.write_partition(date, &trends).await?;
        info!(%date, remaining = trends.len(), "Deleted trend");
        Ok(())
    }
}

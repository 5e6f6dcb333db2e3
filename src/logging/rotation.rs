//! Compression and retention of the daily rotated log files
//!
//! `tracing-appender` rolls the log over at UTC midnight into files named
//! `<prefix>.<YYYY-MM-DD>.<suffix>`. Every file whose date is not today is
//! gzip-compressed in place and the source file removed; only the newest
//! `keep` archives survive.

use crate::config::LoggingConfig;
use crate::error::Result;
use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

const DATE_FORMAT: &str = "%Y-%m-%d";
const ARCHIVE_EXTENSION: &str = "gz";

/// How often rotated files are looked for
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Naming scheme of the rolling log files in one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileLayout {
    pub directory: PathBuf,
    pub prefix: String,
    pub suffix: Option<String>,
}

impl LogFileLayout {
    /// Derive the layout from `logging.directory` and `logging.file_name`
    pub fn from_config(config: &LoggingConfig) -> Self {
        let name = Path::new(&config.file_name);
        let prefix = name
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| config.file_name.clone());
        let suffix = name.extension().map(|s| s.to_string_lossy().to_string());
        Self {
            directory: PathBuf::from(&config.directory),
            prefix,
            suffix,
        }
    }

    /// File name the appender writes to on `date`
    pub fn file_name_for(&self, date: NaiveDate) -> String {
        let date = date.format(DATE_FORMAT);
        match &self.suffix {
            Some(suffix) => format!("{}.{}.{}", self.prefix, date, suffix),
            None => format!("{}.{}", self.prefix, date),
        }
    }

    /// Date of a plain (not yet compressed) rotated file
    pub fn date_of(&self, file_name: &str) -> Option<NaiveDate> {
        let rest = file_name.strip_prefix(&self.prefix)?.strip_prefix('.')?;
        let date = match &self.suffix {
            Some(suffix) => rest.strip_suffix(suffix.as_str())?.strip_suffix('.')?,
            None => rest,
        };
        NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
    }

    /// Date of a compressed archive
    pub fn archive_date_of(&self, file_name: &str) -> Option<NaiveDate> {
        let plain = file_name
            .strip_suffix(ARCHIVE_EXTENSION)?
            .strip_suffix('.')?;
        self.date_of(plain)
    }
}

/// Compress every rotated file older than `today`, returning the archives written
pub fn compress_rotated_logs(layout: &LogFileLayout, today: NaiveDate) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in fs::read_dir(&layout.directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(date) = layout.date_of(&name) else {
            continue;
        };
        if date >= today {
            continue;
        }
        let source = entry.path();
        let target = layout
            .directory
            .join(format!("{}.{}", name, ARCHIVE_EXTENSION));
        gzip_file(&source, &target)?;
        fs::remove_file(&source)?;
        archives.push(target);
    }
    archives.sort();
    Ok(archives)
}

/// Delete all but the newest `keep` archives, returning the removed paths
pub fn prune_archives(layout: &LogFileLayout, keep: usize) -> Result<Vec<PathBuf>> {
    let mut dated: Vec<(NaiveDate, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&layout.directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(date) = layout.archive_date_of(&name) {
            dated.push((date, entry.path()));
        }
    }
    dated.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = Vec::new();
    for (_, path) in dated.into_iter().skip(keep) {
        fs::remove_file(&path)?;
        removed.push(path);
    }
    Ok(removed)
}

fn gzip_file(source: &Path, target: &Path) -> Result<()> {
    let result = (|| -> io::Result<()> {
        let mut input = File::open(source)?;
        let mut encoder = GzEncoder::new(File::create(target)?, Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    })();
    if result.is_err() {
        // A partial archive must not shadow the still intact source
        let _ = fs::remove_file(target);
    }
    Ok(result?)
}

/// Run compression and retention once at startup and then hourly
pub fn spawn_maintenance(layout: LogFileLayout, keep: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            ticker.tick().await;
            let layout = layout.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let today = chrono::Utc::now().date_naive();
                let compressed = compress_rotated_logs(&layout, today)?;
                let pruned = prune_archives(&layout, keep)?;
                Ok::<_, crate::error::BridgeError>((compressed.len(), pruned.len()))
            })
            .await;
            match outcome {
                Ok(Ok((0, 0))) => {}
                Ok(Ok((compressed, pruned))) => tracing::debug!(
                    "Log maintenance compressed {} and pruned {} files",
                    compressed, pruned
                ),
                Ok(Err(e)) => tracing::warn!("Log maintenance failed: {}", e),
                Err(e) => tracing::warn!("Log maintenance task failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> LogFileLayout {
        LogFileLayout {
            directory: PathBuf::from("/tmp"),
            prefix: "wallbox".to_string(),
            suffix: Some("log".to_string()),
        }
    }

    #[test]
    fn test_layout_from_config() {
        let cfg = LoggingConfig {
            directory: "/var/log/wb".to_string(),
            file_name: "wallbox.log".to_string(),
            ..Default::default()
        };
        assert_eq!(LogFileLayout::from_config(&cfg), LogFileLayout {
            directory: PathBuf::from("/var/log/wb"),
            prefix: "wallbox".to_string(),
            suffix: Some("log".to_string()),
        });
    }

    #[test]
    fn test_file_names_and_dates() {
        let l = layout();
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(l.file_name_for(d), "wallbox.2024-03-09.log");
        assert_eq!(l.date_of("wallbox.2024-03-09.log"), Some(d));
        assert_eq!(l.archive_date_of("wallbox.2024-03-09.log.gz"), Some(d));
        assert_eq!(l.date_of("wallbox.2024-03-09.log.gz"), None);
        assert_eq!(l.date_of("other.2024-03-09.log"), None);
        assert_eq!(l.date_of("wallbox.yesterday.log"), None);
    }

    #[test]
    fn test_layout_without_extension() {
        let l = LogFileLayout {
            suffix: None,
            ..layout()
        };
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(l.file_name_for(d), "wallbox.2024-03-09");
        assert_eq!(l.date_of("wallbox.2024-03-09"), Some(d));
    }
}

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use wallbox_bridge::config::LoggingConfig;
use wallbox_bridge::logging::parse_log_level;
use wallbox_bridge::logging::rotation::{LogFileLayout, compress_rotated_logs, prune_archives};

fn layout_in(dir: &std::path::Path) -> LogFileLayout {
    let config = LoggingConfig {
        directory: dir.to_string_lossy().to_string(),
        ..LoggingConfig::default()
    };
    LogFileLayout::from_config(&config)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

#[test]
fn level_names_are_case_insensitive() {
    assert_eq!(parse_log_level("warning").unwrap(), tracing::Level::WARN);
    assert_eq!(parse_log_level("Debug").unwrap(), tracing::Level::DEBUG);
    assert!(parse_log_level("verbose").is_err());
}

#[test]
fn rotated_files_are_gzipped_but_today_is_left_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout_in(tmp.path());

    let old = tmp.path().join(layout.file_name_for(day(1)));
    let current = tmp.path().join(layout.file_name_for(day(2)));
    fs::write(&old, "yesterday\n").unwrap();
    fs::write(&current, "today\n").unwrap();
    fs::write(tmp.path().join("unrelated.txt"), "keep").unwrap();

    let archives = compress_rotated_logs(&layout, day(2)).unwrap();

    assert_eq!(archives, vec![tmp.path().join("wallbox.2024-03-01.log.gz")]);
    assert!(!old.exists());
    assert!(current.exists());
    assert!(tmp.path().join("unrelated.txt").exists());

    let mut text = String::new();
    GzDecoder::new(fs::File::open(&archives[0]).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "yesterday\n");
}

#[test]
fn prune_keeps_newest_archives() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout_in(tmp.path());
    for d in 1..=5 {
        let name = format!("{}.gz", layout.file_name_for(day(d)));
        fs::write(tmp.path().join(name), b"x").unwrap();
    }

    let removed = prune_archives(&layout, 2).unwrap();

    assert_eq!(removed.len(), 3);
    let mut left: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    left.sort();
    assert_eq!(
        left,
        vec!["wallbox.2024-03-04.log.gz", "wallbox.2024-03-05.log.gz"]
    );
}

use chrono::{NaiveDate, TimeZone, Utc};
use coldstored::core::snapshot::{
    parse_snapshot_timestamp, pre_restore_key, snapshot_key,
};

#[test]
fn test_snapshot_key_layout() {
    let at = Utc.with_ymd_and_hms(2026, 8, 1, 10, 15, 42).unwrap();
    assert_eq!(
        snapshot_key("base", at),
        "base/2026/08/01/10/cold_db_20260801_101542.sql"
    );
}

#[test]
fn test_snapshot_key_zero_pads() {
    let at = Utc.with_ymd_and_hms(2026, 1, 5, 3, 4, 5).unwrap();
    assert_eq!(
        snapshot_key("base", at),
        "base/2026/01/05/03/cold_db_20260105_030405.sql"
    );
}

#[test]
fn test_pre_restore_key_layout() {
    let at = Utc.with_ymd_and_hms(2026, 8, 1, 10, 15, 42).unwrap();
    assert_eq!(
        pre_restore_key("pre-restore", at),
        "pre-restore/2026/08/01/cold_prerestore_20260801_101542.sql"
    );
}

#[test]
fn test_parse_roundtrip() {
    let at = Utc.with_ymd_and_hms(2026, 8, 1, 10, 15, 42).unwrap();
    let key = snapshot_key("base", at);
    let parsed = parse_snapshot_timestamp(&key).unwrap();
    assert_eq!(parsed, at.naive_utc());

    let pre = pre_restore_key("pre-restore", at);
    assert_eq!(parse_snapshot_timestamp(&pre).unwrap(), at.naive_utc());
}

#[test]
fn test_parse_rejects_foreign_files() {
    assert!(parse_snapshot_timestamp("base/2026/08/01/10/notes.txt").is_none());
    assert!(parse_snapshot_timestamp("cold_db_2026_bad.sql").is_none());
    assert!(parse_snapshot_timestamp("cold_db_20261301_999999.sql").is_none());
}

#[test]
fn test_parse_handles_bare_filenames() {
    let parsed = parse_snapshot_timestamp("cold_db_20260801_101542.sql").unwrap();
    assert_eq!(
        parsed.date(),
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
    );
}

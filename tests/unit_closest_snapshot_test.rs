use chrono::{NaiveDate, NaiveDateTime};
use coldstored::core::restore::{SnapshotEntry, closest_to, group_by_date};
use coldstored::core::snapshot::SnapshotClass;

fn entry(timestamp: NaiveDateTime, source: SnapshotClass) -> SnapshotEntry {
    SnapshotEntry {
        key: format!("base/{}", timestamp.format("%Y/%m/%d/%H/cold_db_%Y%m%d_%H%M%S.sql")),
        source,
        timestamp,
        size: 1024,
    }
}

fn at(date: (i32, u32, u32), time: (u32, u32, u32)) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(date.0, date.1, date.2)
        .unwrap()
        .and_hms_opt(time.0, time.1, time.2)
        .unwrap()
}

#[test]
fn test_closest_picks_nearest_time() {
    let entries = vec![
        entry(at((2026, 8, 1), (9, 0, 0)), SnapshotClass::Cloud),
        entry(at((2026, 8, 1), (12, 0, 0)), SnapshotClass::Cloud),
        entry(at((2026, 8, 1), (18, 0, 0)), SnapshotClass::Local),
    ];
    let target = at((2026, 8, 1), (13, 30, 0));
    let closest = closest_to(entries, target).unwrap();
    assert_eq!(closest.timestamp, at((2026, 8, 1), (12, 0, 0)));
}

#[test]
fn test_closest_of_empty_is_none() {
    assert!(closest_to(Vec::new(), at((2026, 8, 1), (0, 0, 0))).is_none());
}

#[test]
fn test_group_by_date_counts_and_bounds() {
    let entries = vec![
        entry(at((2026, 8, 1), (9, 0, 0)), SnapshotClass::Cloud),
        entry(at((2026, 8, 1), (18, 30, 0)), SnapshotClass::Local),
        entry(at((2026, 7, 31), (23, 0, 0)), SnapshotClass::Cloud),
    ];
    let days = group_by_date(&entries);
    assert_eq!(days.len(), 2);
    // Newest date first.
    assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 8, 1).unwrap());
    assert_eq!(days[0].count, 2);
    assert_eq!(days[0].earliest, at((2026, 8, 1), (9, 0, 0)).time());
    assert_eq!(days[0].latest, at((2026, 8, 1), (18, 30, 0)).time());
    assert_eq!(days[1].count, 1);
}

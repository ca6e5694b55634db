use chrono::NaiveDate;
use coldstored::core::snapshot::{previous_season, season_for};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_season_starts_on_october_first() {
    assert_eq!(season_for(date(2025, 10, 1)), "2025-26");
    assert_eq!(season_for(date(2025, 9, 30)), "2024-25");
}

#[test]
fn test_season_mid_band() {
    assert_eq!(season_for(date(2026, 1, 15)), "2025-26");
    assert_eq!(season_for(date(2026, 7, 31)), "2025-26");
}

#[test]
fn test_season_august_belongs_to_ending_band() {
    // The ten-month band runs October through July; late-summer dates
    // resolve to the band that just ended.
    assert_eq!(season_for(date(2026, 8, 1)), "2025-26");
}

#[test]
fn test_season_year_rollover_formatting() {
    assert_eq!(season_for(date(2099, 11, 1)), "2099-00");
}

#[test]
fn test_previous_season() {
    assert_eq!(previous_season(date(2026, 1, 15)), "2024-25");
    assert_eq!(previous_season(date(2025, 10, 1)), "2024-25");
    assert_eq!(previous_season(date(2025, 9, 30)), "2023-24");
}

use chrono::{NaiveDate, TimeZone, Utc};
use coldstored::core::migrate::split_statements;
use coldstored::core::snapshot::{parse_snapshot_timestamp, season_for, snapshot_key};
use coldstored::core::validation::{mask_secret, validate_version};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_mask_never_reveals_middle(secret in ".{11,64}") {
        let masked = mask_secret(&secret);
        let chars: Vec<char> = secret.chars().collect();
        prop_assert!(masked.chars().count() == 11);
        prop_assert!(masked.contains('\u{2026}'));
        // The mask keeps exactly the first and last five characters.
        let head: String = chars[..5].iter().collect();
        let tail: String = chars[chars.len() - 5..].iter().collect();
        prop_assert_eq!(masked, format!("{head}\u{2026}{tail}"));
    }

    #[test]
    fn prop_valid_versions_accepted(
        lead in "[a-zA-Z0-9]",
        rest in "[a-zA-Z0-9._-]{0,63}",
    ) {
        let version = format!("{lead}{rest}");
        if version.len() <= 64 {
            prop_assert!(validate_version(&version).is_ok());
        }
    }

    #[test]
    fn prop_versions_with_shell_characters_rejected(
        prefix in "[a-z0-9]{1,8}",
        bad in prop::sample::select(vec![';', '|', '&', '$', '`', ' ', '\'', '"', '\n']),
    ) {
        let version = format!("{prefix}{bad}");
        prop_assert!(validate_version(&version).is_err());
    }

    #[test]
    fn prop_season_is_consecutive_years(
        year in 1990i32..2150,
        month in 1u32..=12,
        day in 1u32..=28,
    ) {
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
        let season = season_for(date);
        let (start, tail) = season.split_once('-').unwrap();
        let start: i32 = start.parse().unwrap();
        prop_assert_eq!(tail.len(), 2);
        prop_assert_eq!(tail.parse::<i32>().unwrap(), (start + 1) % 100);
        // The band containing a date starts in that year or the one before.
        prop_assert!(start == year || start == year - 1);
    }

    #[test]
    fn prop_snapshot_keys_roundtrip(
        secs in 0i64..4_000_000_000,
    ) {
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        let key = snapshot_key("base", at);
        prop_assert_eq!(parse_snapshot_timestamp(&key), Some(at.naive_utc()));
    }

    #[test]
    fn prop_split_preserves_statement_count(
        statements in prop::collection::vec("[a-zA-Z0-9 ]{1,20}", 1..8),
    ) {
        let sql: String = statements
            .iter()
            .map(|s| format!("{s};"))
            .collect();
        let split = split_statements(&sql);
        let non_blank = statements.iter().filter(|s| !s.trim().is_empty()).count();
        prop_assert_eq!(split.len(), non_blank);
    }
}

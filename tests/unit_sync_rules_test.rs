use coldstored::core::sync::{
    VIDEO_RETRY_DELAY, is_legacy_media_key, is_video_path, media_object_key, pool_object_key,
    retry_backoff, rewrite_key_extension, should_skip_dir, should_skip_file, video_fallback_path,
};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_backoff_grows_and_caps() {
    assert_eq!(retry_backoff(0), Duration::from_secs(60));
    assert_eq!(retry_backoff(1), Duration::from_secs(120));
    assert_eq!(retry_backoff(2), Duration::from_secs(240));
    // Monotonic until the cap.
    for retry in 0..10 {
        assert!(retry_backoff(retry + 1) >= retry_backoff(retry));
    }
    assert_eq!(retry_backoff(12), Duration::from_secs(3600));
    // Negative counts behave like zero.
    assert_eq!(retry_backoff(-3), Duration::from_secs(60));
}

#[test]
fn test_video_retry_delay_is_thirty_seconds() {
    assert_eq!(VIDEO_RETRY_DELAY, Duration::from_secs(30));
}

#[test]
fn test_scanner_skips_hidden_and_thumbnail_dirs() {
    for dir in [".git", ".thumbs", "thumbs", "__MACOSX"] {
        assert!(should_skip_dir(dir), "descended into {dir}");
    }
    assert!(!should_skip_dir("room-entries"));
    assert!(!should_skip_dir("2026"));
}

#[test]
fn test_scanner_skips_temp_files() {
    for file in [".hidden", "a.tmp", "b.part", "edit~", "swap.swp", "A.TMP"] {
        assert!(should_skip_file(file), "enqueued {file}");
    }
    assert!(!should_skip_file("invoice.pdf"));
    assert!(!should_skip_file("clip.mp4"));
}

#[test]
fn test_pool_object_key_uses_forward_slashes() {
    assert_eq!(pool_object_key("bulk", "a/b/c.bin"), "bulk/a/b/c.bin");
    assert_eq!(pool_object_key("bulk", "a\\b\\c.bin"), "bulk/a/b/c.bin");
    assert_eq!(pool_object_key("bulk", "/leading.bin"), "bulk/leading.bin");
}

#[test]
fn test_media_object_key_shards_by_thock() {
    assert_eq!(
        media_object_key("TH-2026-0042", "room-entry", "photo.jpg"),
        "TH-2026-0042/room-entry_photo.jpg"
    );
}

#[test]
fn test_legacy_prefixes_accepted_on_read() {
    assert!(is_legacy_media_key("room-entry/old.jpg"));
    assert!(is_legacy_media_key("gate-pass/old.jpg"));
    assert!(!is_legacy_media_key("TH-1/room-entry_new.jpg"));
}

#[test]
fn test_video_fallback_rewrites_extension() {
    assert_eq!(
        video_fallback_path("/srv/media/clip.mov"),
        Some(PathBuf::from("/srv/media/clip.mp4"))
    );
    // Already mp4: nothing to rewrite.
    assert_eq!(video_fallback_path("/srv/media/clip.mp4"), None);
    // Not a video.
    assert_eq!(video_fallback_path("/srv/media/scan.pdf"), None);
}

#[test]
fn test_is_video_path_by_extension() {
    assert!(is_video_path("clip.MOV"));
    assert!(is_video_path("clip.webm"));
    assert!(!is_video_path("doc.txt"));
    assert!(!is_video_path("noext"));
}

#[test]
fn test_rewrite_key_extension() {
    assert_eq!(
        rewrite_key_extension("TH-1/room-entry_clip.mov", "mp4"),
        "TH-1/room-entry_clip.mp4"
    );
    // A dot in a directory name must not be mistaken for the extension.
    assert_eq!(
        rewrite_key_extension("pool.v2/clip", "mp4"),
        "pool.v2/clip.mp4"
    );
}

use coldstored::config::Config;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_default_pool_cadences() {
    let config = Config::default();
    assert_eq!(config.pool_interval("bulk"), Duration::from_secs(15 * 60));
    assert_eq!(
        config.pool_interval("highspeed"),
        Duration::from_secs(15 * 60)
    );
    assert_eq!(
        config.pool_interval("archives"),
        Duration::from_secs(60 * 60)
    );
    assert_eq!(config.pool_interval("backups"), Duration::from_secs(60 * 60));
    // Unknown pools fall back to the default cadence.
    assert_eq!(
        config.pool_interval("never-configured"),
        Duration::from_secs(15 * 60)
    );
}

#[test]
fn test_database_url() {
    let config = Config::default();
    assert_eq!(
        config.database.url(),
        "postgres://coldstore:@127.0.0.1:5432/coldstore"
    );
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.port, 8878);
    assert_eq!(config.media.workers, 2);
    assert_eq!(config.media.max_retries, 3);
    assert_eq!(config.snapshot.base_prefix, "base");
    assert_eq!(config.snapshot.pre_restore_prefix, "pre-restore");
    assert_eq!(config.deploy.rollout_timeout, Duration::from_secs(120));
    assert_eq!(config.ssh.port, 22);
}

#[cfg(unix)]
fn write_config(contents: &str, mode: u32) -> tempfile::TempPath {
    use std::os::unix::fs::PermissionsExt;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    let path = file.into_temp_path();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
    path
}

#[cfg(unix)]
#[test]
fn test_from_file_accepts_private_file() {
    let path = write_config(
        "port = 9000\nlog_level = \"debug\"\n\n[media]\nworkers = 3\n",
        0o600,
    );
    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.port, 9000);
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.media.workers, 3);
}

#[cfg(unix)]
#[test]
fn test_from_file_rejects_world_readable_file() {
    let path = write_config("port = 9000\n", 0o644);
    let err = Config::from_file(path.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("chmod"));
}

#[cfg(unix)]
#[test]
fn test_from_file_rejects_duplicate_pools() {
    let path = write_config(
        "[[media.pools]]\nname = \"bulk\"\nroot = \"/srv/a\"\n\n[[media.pools]]\nname = \"bulk\"\nroot = \"/srv/b\"\n",
        0o600,
    );
    assert!(Config::from_file(path.to_str().unwrap()).is_err());
}

#[cfg(unix)]
#[test]
fn test_s3_backend_requires_secret() {
    let path = write_config(
        "[snapshot.s3]\nbucket = \"cold-snaps\"\nendpoint = \"http://minio:9000\"\naccess_key = \"AKIA12345\"\n",
        0o600,
    );
    let err = Config::from_file(path.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("secret key"));
}

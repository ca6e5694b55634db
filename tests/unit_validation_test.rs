use coldstored::core::validation::{
    mask_secret, validate_image_repo, validate_pool_name, validate_target, validate_version,
};

#[test]
fn test_image_repo_accepts_registry_paths() {
    assert!(validate_image_repo("registry.local/cold/backoffice").is_ok());
    assert!(validate_image_repo("cold_store-v2").is_ok());
}

#[test]
fn test_image_repo_rejects_uppercase_and_length() {
    assert!(validate_image_repo("Registry/app").is_err());
    assert!(validate_image_repo("").is_err());
    assert!(validate_image_repo(&"a".repeat(129)).is_err());
    assert!(validate_image_repo(&"a".repeat(128)).is_ok());
}

#[test]
fn test_image_repo_rejects_shell_metacharacters() {
    for payload in [
        "repo;rm -rf /",
        "repo$(id)",
        "repo`id`",
        "repo|cat",
        "repo name",
        "repo\nname",
    ] {
        assert!(validate_image_repo(payload).is_err(), "accepted {payload:?}");
    }
}

#[test]
fn test_version_requires_alphanumeric_lead() {
    assert!(validate_version("v1.5.42").is_ok());
    assert!(validate_version("1.0.0_rc-1").is_ok());
    assert!(validate_version("-v1").is_err());
    assert!(validate_version(".hidden").is_err());
}

#[test]
fn test_version_rejects_injection_and_length() {
    assert!(validate_version("v1;reboot").is_err());
    assert!(validate_version("v1 v2").is_err());
    assert!(validate_version("").is_err());
    assert!(validate_version(&"v".repeat(65)).is_err());
    assert!(validate_version(&"v".repeat(64)).is_ok());
}

#[test]
fn test_target_is_dns_label_shaped() {
    assert!(validate_target("employee").is_ok());
    assert!(validate_target("customer-2").is_ok());
    assert!(validate_target("-edge").is_err());
    assert!(validate_target("edge-").is_err());
    assert!(validate_target("UPPER").is_err());
    assert!(validate_target("a;b").is_err());
}

#[test]
fn test_pool_name_rules() {
    assert!(validate_pool_name("bulk").is_ok());
    assert!(validate_pool_name("high_speed").is_ok());
    assert!(validate_pool_name("").is_err());
    assert!(validate_pool_name("a/b").is_err());
}

#[test]
fn test_mask_secret_first5_last5() {
    assert_eq!(mask_secret("abcdefghijklmnop"), "abcde\u{2026}lmnop");
}

#[test]
fn test_mask_secret_short_values_fully_redacted() {
    // Short secrets must not leak overlapping halves.
    assert_eq!(mask_secret("abcdefghij"), "*****");
    assert_eq!(mask_secret("hunter2"), "*****");
    assert_eq!(mask_secret(""), "*****");
}

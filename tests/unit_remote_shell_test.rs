use coldstored::core::remote::{RemoteShell, parse_os_release, shell_quote};
use std::time::Duration;

#[test]
fn test_shell_quote_wraps_once() {
    assert_eq!(shell_quote("plain"), "'plain'");
    assert_eq!(shell_quote("with space"), "'with space'");
}

#[test]
fn test_shell_quote_escapes_embedded_quotes() {
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
    // Hostile input stays inert inside single quotes.
    assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
    assert_eq!(shell_quote("a;b|c"), "'a;b|c'");
}

#[test]
fn test_parse_os_release() {
    let contents = "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\n";
    assert_eq!(parse_os_release(contents), "distro=ubuntu; version=22.04");
}

#[test]
fn test_parse_os_release_unquoted_values() {
    let contents = "ID=debian\nVERSION_ID=12\n";
    assert_eq!(parse_os_release(contents), "distro=debian; version=12");
}

#[test]
fn test_parse_os_release_missing_fields() {
    assert_eq!(parse_os_release(""), "distro=unknown; version=unknown");
}

#[tokio::test]
async fn test_ping_unreachable_port() {
    let shell = RemoteShell::new(Duration::from_secs(1));
    // A port in TEST-NET space nobody answers on.
    let reachable = shell
        .ping("192.0.2.1", 4444, Duration::from_millis(200))
        .await;
    assert!(!reachable);
}

#[tokio::test]
async fn test_ping_reachable_port() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let shell = RemoteShell::new(Duration::from_secs(1));
    assert!(
        shell
            .ping("127.0.0.1", port, Duration::from_secs(1))
            .await
    );
}

use coldstored::core::migrate::{canonical_schema, split_statements};

#[test]
fn test_plain_statements_split_on_semicolons() {
    let sql = "CREATE TABLE a (id INT);\nCREATE TABLE b (id INT);\n";
    let statements = split_statements(sql);
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("CREATE TABLE a"));
    assert!(statements[1].starts_with("CREATE TABLE b"));
}

#[test]
fn test_dollar_quoted_body_keeps_semicolons() {
    let sql = "CREATE FUNCTION f() RETURNS trigger AS $$\nBEGIN\n  UPDATE t SET x = 1;\n  RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql;\nSELECT 1;";
    let statements = split_statements(sql);
    assert_eq!(statements.len(), 2);
    assert!(statements[0].contains("UPDATE t SET x = 1;"));
    assert!(statements[0].contains("RETURN NEW;"));
    assert_eq!(statements[1], "SELECT 1");
}

#[test]
fn test_tagged_dollar_quotes() {
    let sql = "CREATE FUNCTION g() RETURNS text AS $fn$ SELECT 'a;b'; $fn$ LANGUAGE sql;";
    let statements = split_statements(sql);
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("SELECT 'a;b';"));
}

#[test]
fn test_single_quoted_strings_keep_semicolons() {
    let sql = "INSERT INTO t VALUES ('a;b', 'it''s;fine');\nSELECT 2;";
    let statements = split_statements(sql);
    assert_eq!(statements.len(), 2);
    assert!(statements[0].contains("'a;b'"));
    assert!(statements[0].contains("'it''s;fine'"));
}

#[test]
fn test_line_comments_do_not_terminate() {
    let sql = "-- leading comment; with semicolon\nSELECT 1; -- trailing; comment\nSELECT 2;";
    let statements = split_statements(sql);
    assert_eq!(statements.len(), 2);
    assert!(statements[0].contains("SELECT 1"));
    assert!(statements[1].contains("SELECT 2"));
}

#[test]
fn test_empty_fragments_dropped() {
    let statements = split_statements(";;  ;\n;");
    assert!(statements.is_empty());
}

#[test]
fn test_canonical_schema_splits_cleanly() {
    let statements = split_statements(canonical_schema());
    // The trigger function body must survive as one statement.
    let function = statements
        .iter()
        .find(|s| s.contains("touch_change_tracking"))
        .expect("trigger function present");
    assert!(function.contains("ON CONFLICT (table_name) DO UPDATE"));
    assert!(function.contains("RETURN NEW;"));
    // Every statement is non-empty and trimmed.
    assert!(statements.iter().all(|s| !s.trim().is_empty()));
}

use std::process::Command;

fn forum_import() -> Command {
    Command::new(env!("CARGO_BIN_EXE_forum-import"))
}

#[test]
fn missing_arguments_print_usage() {
    let output = forum_import().output().expect("binary runs");
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "stderr was: {stderr}");
}

#[test]
fn missing_input_file_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("missing.json");
    let output_path = dir.path().join("out.json");

    let output = forum_import()
        .arg(&input)
        .arg(&output_path)
        .env_remove("DATABASE_URL")
        .output()
        .expect("binary runs");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "stderr was: {stderr}");
    assert!(stderr.contains("Usage"), "stderr was: {stderr}");
    assert!(!output_path.exists());
}

#[test]
fn missing_database_url_fails_after_argument_checks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("export.json");
    std::fs::write(&input, "").expect("write export");

    let output = forum_import()
        .arg(&input)
        .arg(dir.path().join("out.json"))
        .env_remove("DATABASE_URL")
        .output()
        .expect("binary runs");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DATABASE_URL"), "stderr was: {stderr}");
}

use std::fs;

use predicates::prelude::*;

fn adapter_path(name: &str) -> String {
    format!("{}/adapters/{name}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn adapter_check_prints_a_summary() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.args([
        "adapter",
        "check",
        "--adapter",
        &adapter_path("indexed-gbk.yaml"),
        "--id",
        "42",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("adapter: indexed-gbk"))
    .stdout(predicate::str::contains("work_type: auto"))
    .stdout(predicate::str::contains(
        "detail_url: https://www.novels.example/book/42/",
    ));
}

#[test]
fn bundled_adapters_compile() {
    for name in ["indexed-gbk.yaml", "paginated.yaml", "latin-single.yaml"] {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
        cmd.args(["adapter", "check", "--adapter", &adapter_path(name)])
            .assert()
            .success();
    }
}

#[test]
fn invalid_pattern_is_rejected() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("broken.yaml");
    fs::write(
        &path,
        "name: broken\nbase_url: https://b.example/\ndetail_url: \"{base}/{id}\"\ntitle_patterns: ['(unclosed']\ncontent_patterns: ['x']\n",
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.args(["adapter", "check", "--adapter", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("adapter check"))
        .stderr(predicate::str::contains("title_patterns"));
    Ok(())
}

#[test]
fn crawl_requires_an_id() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.args([
        "crawl",
        "--adapter",
        &adapter_path("paginated.yaml"),
        "--out",
        "out",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--id"));
}

#[test]
fn bookfetch_log_debug_emits_debug_line_to_stderr() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.env("BOOKFETCH_LOG", "debug")
        .env_remove("RUST_LOG")
        .args(["adapter", "check", "--adapter", &adapter_path("paginated.yaml")])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}

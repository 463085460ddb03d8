use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bookfetch::formats::{HistoryRecord, HistoryStatus};
use predicates::prelude::*;

const INDEX_PAGE: &str = r#"<!doctype html>
<html>
  <head><title>长夜</title></head>
  <body>
    <h1>长夜</h1>
    <p>作者：林舟</p>
    <h3>目录</h3>
    <ul>
      <li><a href="3.html">第三章 破晓</a></li>
      <li><a href="1.html">第一章 入夜</a></li>
      <li><a href="2.html">第二章 灯火</a></li>
    </ul>
  </body>
</html>
"#;

const PAGINATED_DETAIL: &str = r#"<!doctype html>
<html>
  <body>
    <h1>分页</h1>
    <a href="/book/9/p1.html">开始阅读</a>
  </body>
</html>
"#;

fn chapter_page(text: &str) -> String {
    format!(r#"<html><body><div id="content"><p>{text}</p></div></body></html>"#)
}

fn chain_page(page: usize, next: &str) -> String {
    format!(
        r#"<html><body><h2>第{page}页</h2><div id="content">第{page}页正文</div><a href="{next}">下一页</a></body></html>"#
    )
}

fn spawn_books_server() -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let addr = server.server_addr();
    let base_url = format!("http://{addr}");

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let url = request.url().to_string();
            let (status, body, charset): (u16, Vec<u8>, &str) = match url.as_str() {
                "/book/1/" => (200, INDEX_PAGE.as_bytes().to_vec(), "utf-8"),
                "/book/1/1.html" => (200, chapter_page("夜色四合。").into_bytes(), "utf-8"),
                "/book/1/2.html" => (200, chapter_page("灯火&amp;人声。").into_bytes(), "utf-8"),
                "/book/2/" => {
                    let page = r#"<html><body><h1>短篇</h1><div id="content">春眠不觉晓，处处闻啼鸟。</div></body></html>"#;
                    let (bytes, _, _) = encoding_rs::GBK.encode(page);
                    (200, bytes.into_owned(), "gbk")
                }
                "/book/9/" => (200, PAGINATED_DETAIL.as_bytes().to_vec(), "utf-8"),
                "/book/9/p1.html" => (200, chain_page(1, "p2.html").into_bytes(), "utf-8"),
                "/book/9/p2.html" => (200, chain_page(2, "p3.html").into_bytes(), "utf-8"),
                "/book/9/p3.html" => (200, chain_page(3, "p4.html").into_bytes(), "utf-8"),
                "/book/9/p4.html" => (200, chain_page(4, "/book/9/").into_bytes(), "utf-8"),
                _ => (404, b"not found".to_vec(), "utf-8"),
            };

            let content_type = format!("text/html; charset={charset}");
            let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                .expect("build header");
            let response = tiny_http::Response::from_data(body)
                .with_status_code(status)
                .with_header(header);
            let _ = request.respond(response);
        }
    });

    (base_url, shutdown_tx, handle)
}

fn write_adapter(dir: &Path, base_url: &str) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join("adapter.yaml");
    fs::write(
        &path,
        format!(
            r#"name: local
base_url: {base_url}/
detail_url: "{{base}}/book/{{id}}/"
title_patterns: ['<h1>(.*?)</h1>']
author_patterns: ['作者：([^<]+)']
content_patterns: ['<div id="content">(.*?)</div>']
page_title_patterns: ['<h2>(.*?)</h2>']
"#
        ),
    )?;
    Ok(path)
}

fn bookfetch() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.env_remove("BOOKFETCH_PROXY_URL")
        .env_remove("BOOKFETCH_BROWSER_COMMAND")
        .env_remove("BOOKFETCH_LOG")
        .env_remove("RUST_LOG");
    cmd
}

fn read_history(path: &Path) -> anyhow::Result<Vec<HistoryRecord>> {
    fs::read_to_string(path)?
        .lines()
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

#[test]
fn crawl_writes_books_and_history() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, server_handle) = spawn_books_server();
    let temp = tempfile::TempDir::new()?;
    let adapter = write_adapter(temp.path(), &base_url)?;
    let out = temp.path().join("out");

    bookfetch()
        .args([
            "crawl",
            "--adapter",
            adapter.to_str().unwrap(),
            "--id",
            "1",
            "--id",
            "2",
            "--id",
            "9",
            "--out",
            out.to_str().unwrap(),
            "--delay-ms",
            "0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("长夜.txt"))
        .stdout(predicate::str::contains("短篇.txt"))
        .stdout(predicate::str::contains("分页.txt"));

    let indexed = fs::read_to_string(out.join("长夜.txt"))?;
    assert!(indexed.starts_with("# 长夜\n\n## 第一章 入夜\n\n夜色四合。\n\n## 第二章 灯火\n\n灯火&人声。\n\n"));
    assert!(indexed.ends_with("## 第三章 破晓\n\n"), "{indexed}");

    let single = fs::read_to_string(out.join("短篇.txt"))?;
    assert_eq!(single, "# 短篇\n\n## 短篇\n\n春眠不觉晓，处处闻啼鸟。\n\n");

    let paginated = fs::read_to_string(out.join("分页.txt"))?;
    for page in 1..=4 {
        assert!(paginated.contains(&format!("## 第{page}页\n\n第{page}页正文\n")), "{paginated}");
    }
    assert!(!paginated.contains("第5页"));

    let history = read_history(&out.join("history.jsonl"))?;
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|record| record.status == HistoryStatus::Success));
    assert_eq!(history[0].work_id, "1");
    assert_eq!(history[0].chapters, 3);
    assert_eq!(history[0].failed_chapters, 1);
    assert_eq!(history[2].chapters, 4);

    let _ = shutdown_tx.send(());
    let _ = server_handle.join();
    Ok(())
}

#[test]
fn repeated_failures_skip_the_work() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, server_handle) = spawn_books_server();
    let temp = tempfile::TempDir::new()?;
    let adapter = write_adapter(temp.path(), &base_url)?;
    let out = temp.path().join("out");

    let args = [
        "crawl",
        "--adapter",
        adapter.to_str().unwrap(),
        "--id",
        "404",
        "--out",
        out.to_str().unwrap(),
        "--delay-ms",
        "0",
    ];
    for _ in 0..3 {
        bookfetch()
            .args(args)
            .assert()
            .failure()
            .stderr(predicate::str::contains("1 of 1 works failed"));
    }
    bookfetch()
        .args(args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("skipping work with repeated failures"));

    let history = read_history(&out.join("history.jsonl"))?;
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|record| record.status == HistoryStatus::Failed));
    assert!(history[0].error.as_deref().unwrap_or_default().contains("not found"));
    assert_eq!(
        history[3].error.as_deref(),
        Some("skipped after 3 consecutive failures")
    );

    let _ = shutdown_tx.send(());
    let _ = server_handle.join();
    Ok(())
}

#[test]
fn inspect_prints_the_plan_as_json() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, server_handle) = spawn_books_server();
    let temp = tempfile::TempDir::new()?;
    let adapter = write_adapter(temp.path(), &base_url)?;

    let output = bookfetch()
        .args(["inspect", "--adapter", adapter.to_str().unwrap(), "--id", "1"])
        .output()?;
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["work"]["title"], "长夜");
    assert_eq!(report["work"]["author"], "林舟");
    assert_eq!(report["work"]["work_type"], "indexed_multi_chapter");
    assert_eq!(report["plan"]["mode"], "indexed");
    let titles = report["plan"]["chapters"]
        .as_array()
        .map(|chapters| {
            chapters
                .iter()
                .filter_map(|chapter| chapter["title"].as_str())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    assert_eq!(titles, vec!["第一章 入夜", "第二章 灯火", "第三章 破晓"]);

    let _ = shutdown_tx.send(());
    let _ = server_handle.join();
    Ok(())
}

#[test]
fn fetch_decodes_declared_charset() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, server_handle) = spawn_books_server();

    bookfetch()
        .args(["fetch", "--url", &format!("{base_url}/book/2/")])
        .assert()
        .success()
        .stdout(predicate::str::contains("春眠不觉晓"))
        .stderr(predicate::str::contains("GBK"));

    bookfetch()
        .args(["fetch", "--url", &format!("{base_url}/missing")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));

    let _ = shutdown_tx.send(());
    let _ = server_handle.join();
    Ok(())
}

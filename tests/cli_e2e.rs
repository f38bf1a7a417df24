//! End-to-end CLI tests for the sora-batch binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

/// Binary command isolated from the user's config and log settings.
fn sora_batch(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sora-batch").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG")
        .env_remove("GEMINI_API_KEY")
        .env_remove("API_KEY")
        .current_dir(home);
    cmd
}

async fn mount_video(server: &MockServer, id: &str, body: &'static [u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/MP4/{id}.mp4")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

fn write_input(dir: &Path, links: &str) -> std::path::PathBuf {
    let input = dir.join("links.txt");
    std::fs::write(&input, links).unwrap();
    input
}

// ==================== Basic Invocation ====================

#[test]
fn test_binary_help_displays_usage() {
    let temp = TempDir::new().unwrap();
    sora_batch(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Batch download Sora videos"))
        .stdout(predicate::str::contains("attended"));
}

#[test]
fn test_binary_version_displays_version() {
    let temp = TempDir::new().unwrap();
    sora_batch(temp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sora-batch"));
}

#[test]
fn test_binary_requires_subcommand() {
    let temp = TempDir::new().unwrap();
    sora_batch(temp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let temp = TempDir::new().unwrap();
    sora_batch(temp.path())
        .args(["run", "--invalid-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_rejects_unsupported_concurrency() {
    let temp = TempDir::new().unwrap();
    sora_batch(temp.path())
        .args(["run", "-c", "32"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("32"));
}

// ==================== Unattended Mode ====================

#[test]
fn test_run_missing_input_file_is_fatal() {
    let temp = TempDir::new().unwrap();
    sora_batch(temp.path())
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Input file not found"))
        .stderr(predicate::str::contains("sora_movies.txt"));
}

#[test]
fn test_run_without_valid_links_exits_zero() {
    let temp = TempDir::new().unwrap();
    let input = write_input(temp.path(), "hello, not a link\n");
    sora_batch(temp.path())
        .args(["run", "-i"])
        .arg(&input)
        .assert()
        .success()
        .stderr(predicate::str::contains("Could not extract ID from URL: hello"))
        .stderr(predicate::str::contains("No valid Sora URLs detected"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_downloads_then_skips_on_rerun() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_video(&server, "abc123", b"first video").await;
    mount_video(&server, "def-456", b"second video").await;

    let temp = TempDir::new().unwrap();
    let input = write_input(
        temp.path(),
        "https://sora.chatgpt.com/p/abc123\nhttps://oscdn2.dyysy.com/MP4/def-456.mp4\n",
    );
    let out = temp.path().join("videos");
    let base = format!("{}/MP4", server.uri());

    sora_batch(temp.path())
        .args(["run", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(&out)
        .args(["--resource-base", base.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Done: 2 downloaded, 0 skipped, 0 failed",
        ));

    assert_eq!(std::fs::read(out.join("Sora_abc123.mp4")).unwrap(), b"first video");
    assert_eq!(std::fs::read(out.join("Sora_def-456.mp4")).unwrap(), b"second video");

    let requests_before = server.received_requests().await.unwrap().len();
    sora_batch(temp.path())
        .args(["run", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(&out)
        .args(["--resource-base", base.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Done: 0 downloaded, 2 skipped, 0 failed",
        ));
    assert_eq!(
        server.received_requests().await.unwrap().len(),
        requests_before
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_partial_failure_exits_two() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_video(&server, "good", b"video").await;
    Mock::given(method("GET"))
        .and(path("/MP4/z9.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let input = write_input(temp.path(), "https://x/p/good, https://x/p/z9");

    sora_batch(temp.path())
        .args(["run", "-i"])
        .arg(&input)
        .arg("--resource-base")
        .arg(format!("{}/MP4", server.uri()))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("FAILED z9"))
        .stdout(predicate::str::contains("1 downloaded, 0 skipped, 1 failed"));

    assert!(temp.path().join("downloads").join("Sora_good.mp4").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_all_failed_exits_one() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let input = write_input(temp.path(), "https://x/p/a https://x/p/b");

    sora_batch(temp.path())
        .args(["run", "-i"])
        .arg(&input)
        .arg("--resource-base")
        .arg(format!("{}/MP4", server.uri()))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("0 downloaded, 0 skipped, 2 failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_write_failure_is_fatal() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_video(&server, "a", b"first").await;
    mount_video(&server, "b", b"second").await;

    let temp = TempDir::new().unwrap();
    let input = write_input(temp.path(), "https://x/p/a\nhttps://x/p/b\n");
    let downloads = temp.path().join("downloads");
    std::fs::create_dir_all(downloads.join("Sora_a.mp4.part")).unwrap();

    sora_batch(temp.path())
        .args(["run", "-c", "1", "-i"])
        .arg(&input)
        .arg("--resource-base")
        .arg(format!("{}/MP4", server.uri()))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED a: Could not write"))
        .stderr(predicate::str::contains("Error: Run halted by a write failure"));

    assert!(!downloads.join("Sora_b.mp4").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_reads_defaults_from_config_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_video(&server, "cfg", b"configured").await;

    let temp = TempDir::new().unwrap();
    write_input(temp.path(), "https://x/p/cfg");
    let config_dir = temp.path().join(".config").join("sora-batch");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        format!(
            "input_file = \"links.txt\"\noutput_dir = \"from-config\"\nresource_base = \"{}/MP4\"\nconcurrency = 2\n",
            server.uri()
        ),
    )
    .unwrap();

    sora_batch(temp.path()).arg("run").assert().success();

    assert!(temp.path().join("from-config").join("Sora_cfg.mp4").exists());
}

#[test]
fn test_invalid_config_file_is_fatal() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("bad.toml");
    std::fs::write(&config, "concurrency = 99\n").unwrap();

    sora_batch(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("concurrency"));
}

// ==================== Attended Mode ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_attended_session_from_stdin() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_video(&server, "abc", b"attended video").await;
    Mock::given(method("GET"))
        .and(path("/MP4/bad.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let failed = temp.path().join("failed.txt");
    let script = format!(
        "limit 2\nadd https://sora.chatgpt.com/p/abc https://sora.chatgpt.com/p/bad\nstart\nwait\nstatus\nexport {}\nquit\n",
        failed.display()
    );

    sora_batch(temp.path())
        .arg("attended")
        .arg("--resource-base")
        .arg(format!("{}/MP4", server.uri()))
        .write_stdin(script)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Concurrency limit is now 2."))
        .stdout(predicate::str::contains("Queued 2 new, 0 already queued."))
        .stdout(predicate::str::contains(
            "Batch finished: 1 downloaded, 0 skipped, 1 failed.",
        ))
        .stdout(predicate::str::contains("Wrote 1 failed URLs"));

    assert_eq!(
        std::fs::read_to_string(&failed).unwrap(),
        "https://sora.chatgpt.com/p/bad\n"
    );
    assert!(temp.path().join("downloads").join("Sora_abc.mp4").exists());
}

#[test]
fn test_attended_end_of_input_exits_cleanly() {
    let temp = TempDir::new().unwrap();
    sora_batch(temp.path())
        .arg("attended")
        .write_stdin("help\nbogus\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("retry-all"))
        .stdout(predicate::str::contains("error: unknown command `bogus`"));
}

//! End-to-end pipeline runs against fixture fetchers, a local HTTP archive
//! server and a local git repository. The publish tool is replaced with a
//! shell snippet that prints the bundle marker.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::Arc;

use async_trait::async_trait;
use permadeploy_core::config::shell_command;
use permadeploy_core::{
    BuildRunner, DeployConfig, DeployPipeline, DeploymentRequest, FetchError, FetchStrategy,
    PipelineError, PipelineState, Publisher, SourceFetcher, SourceReference, Stage, StageStatus,
    WorkingTree, METRICS,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const PUBLISH_OK: &str =
    "test -d dist || exit 3; echo \"deploying for $1\"; echo 'Bundle TxId [abc123]'";

/// Writes a fixed set of files into the tree root.
struct FixtureFetcher {
    files: Vec<(&'static str, &'static str)>,
}

#[async_trait]
impl SourceFetcher for FixtureFetcher {
    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Archive
    }

    async fn fetch(
        &self,
        _source: &SourceReference,
        tree: &WorkingTree,
    ) -> Result<PathBuf, FetchError> {
        let root = tree.root();
        for (rel, contents) in &self.files {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, contents).unwrap();
        }
        Ok(root)
    }
}

struct MissingRepoFetcher;

#[async_trait]
impl SourceFetcher for MissingRepoFetcher {
    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Archive
    }

    async fn fetch(
        &self,
        source: &SourceReference,
        _tree: &WorkingTree,
    ) -> Result<PathBuf, FetchError> {
        Err(FetchError::NotFound {
            url: source.canonical_url.clone(),
        })
    }
}

/// Moves the run directory out from under the working tree, so removing it
/// later fails. The snapshot is written at the new location.
struct RelocatingFetcher {
    to: PathBuf,
    succeed: bool,
}

#[async_trait]
impl SourceFetcher for RelocatingFetcher {
    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Archive
    }

    async fn fetch(
        &self,
        source: &SourceReference,
        tree: &WorkingTree,
    ) -> Result<PathBuf, FetchError> {
        std::fs::rename(tree.run_dir(), &self.to).unwrap();
        if !self.succeed {
            return Err(FetchError::NotFound {
                url: source.canonical_url.clone(),
            });
        }
        let root = self.to.join(tree.name());
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.html"), "<h1>moved</h1>").unwrap();
        Ok(root)
    }
}

fn pipeline(
    work_root: &Path,
    fetcher: Arc<dyn SourceFetcher>,
    build_script: &str,
    publish_script: &str,
) -> DeployPipeline {
    DeployPipeline::new(
        work_root,
        fetcher,
        BuildRunner::new(shell_command(build_script), "build", 30),
        Publisher::new(
            shell_command(publish_script),
            "ant-test",
            "https://arweave.net",
            30,
        ),
    )
}

fn static_site() -> Arc<dyn SourceFetcher> {
    Arc::new(FixtureFetcher {
        files: vec![
            ("index.html", "<h1>hi</h1>"),
            ("assets/site.css", "body {}"),
            (".git/HEAD", "ref: refs/heads/main"),
        ],
    })
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

#[tokio::test]
async fn static_site_is_passed_through_and_published() {
    let work = tempfile::tempdir().unwrap();
    let pipeline = pipeline(work.path(), static_site(), "exit 1", PUBLISH_OK);

    let outcome = pipeline
        .run(DeploymentRequest::manual("https://github.com/acme/site").unwrap())
        .await;

    let receipt = outcome.result.as_ref().unwrap();
    assert_eq!(receipt.transaction_id, "abc123");
    assert_eq!(receipt.public_url, "https://arweave.net/abc123");
    assert_eq!(outcome.state, PipelineState::CleanedUp { success: true });

    let stages: Vec<Stage> = outcome.log.entries().iter().map(|e| e.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Request,
            Stage::Fetch,
            Stage::Build,
            Stage::Stage,
            Stage::Publish,
            Stage::Cleanup
        ]
    );
    assert!(!outcome.log.has_failure());
    let seqs: Vec<u64> = outcome.log.entries().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);

    let staged = &outcome.log.entries()[3].message;
    assert!(staged.contains("assets, index.html"), "{staged}");
    assert!(!staged.contains(".git"));

    assert!(!outcome.working_dir.unwrap().exists());
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn manifest_triggers_build_and_stages_its_output() {
    let work = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FixtureFetcher {
        files: vec![
            ("package.json", "{\"name\":\"app\"}"),
            ("src/index.html", "<h1>built</h1>"),
        ],
    });
    let pipeline = pipeline(
        work.path(),
        fetcher,
        "mkdir -p build && cp src/index.html build/index.html",
        "test -f dist/index.html || exit 4; \
         test -f dist/package.json && exit 5; \
         echo 'Bundle TxId [built_1]'",
    );

    let outcome = pipeline
        .run(DeploymentRequest::manual("acme/app").unwrap())
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert!(outcome.log.entries()[2].message.starts_with("build finished"));
    let resp = outcome.to_response();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["deployUrl"], "https://arweave.net/built_1");
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn failing_build_reports_500_and_cleans_up() {
    let work = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FixtureFetcher {
        files: vec![("package.json", "{}")],
    });
    let pipeline = pipeline(
        work.path(),
        fetcher,
        "echo 'npm ERR! missing script: build' >&2; exit 1",
        PUBLISH_OK,
    );

    let outcome = pipeline
        .run(DeploymentRequest::manual("acme/app").unwrap())
        .await;

    assert!(matches!(outcome.result, Err(PipelineError::Build(_))));
    assert_eq!(outcome.state, PipelineState::CleanedUp { success: false });

    let failed: Vec<_> = outcome
        .log
        .entries()
        .iter()
        .filter(|e| e.status == StageStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage, Stage::Build);
    assert!(failed[0].message.contains("missing script"));

    let resp = outcome.to_response();
    assert_eq!(resp.status, 500);
    assert_eq!(resp.body["error"], "Build failed");
    assert!(resp.body["logs"].as_str().unwrap().contains("cleanup ok"));
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn publish_without_marker_is_a_failure() {
    let work = tempfile::tempdir().unwrap();
    let pipeline = pipeline(work.path(), static_site(), "exit 1", "echo 'Deployed!'");

    let resp = pipeline
        .handle(None, &json!({ "repoUrl": "https://github.com/acme/site" }))
        .await;

    assert_eq!(resp.status, 500);
    assert_eq!(resp.body["error"], "Failed to retrieve transaction ID");
    assert_eq!(resp.body["retryable"], false);
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn missing_repository_maps_to_not_found() {
    let work = tempfile::tempdir().unwrap();
    let pipeline = pipeline(work.path(), Arc::new(MissingRepoFetcher), "exit 1", PUBLISH_OK);

    let resp = pipeline
        .handle(None, &json!({ "repoUrl": "acme/gone" }))
        .await;

    assert_eq!(resp.status, 500);
    assert_eq!(resp.body["error"], "Repository not found");
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn rejected_request_creates_nothing() {
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("runs");
    let pipeline = pipeline(&root, static_site(), "exit 1", PUBLISH_OK);

    for body in [json!({}), json!({ "repoUrl": 42 }), json!({ "repoUrl": "" })] {
        let resp = pipeline.handle(None, &body).await;
        assert_eq!(resp.status, 400, "{body}");
        assert!(resp.body["logs"].is_string());
    }
    let resp = pipeline.handle(None, &json!({})).await;
    assert_eq!(resp.body["error"], "Repository URL is required");

    let resp = pipeline
        .handle(Some("push"), &json!({ "repoUrl": "acme/site" }))
        .await;
    assert_eq!(resp.status, 400);

    assert!(!root.exists());
}

#[tokio::test]
async fn repeated_runs_of_one_reference_are_isolated() {
    let work = tempfile::tempdir().unwrap();
    let pipeline = pipeline(work.path(), static_site(), "exit 1", PUBLISH_OK);

    let first = pipeline
        .run(DeploymentRequest::manual("acme/site").unwrap())
        .await;
    let second = pipeline
        .run(DeploymentRequest::manual("acme/site").unwrap())
        .await;

    assert!(first.is_success());
    assert!(second.is_success());
    assert_ne!(first.run_id, second.run_id);
    assert_ne!(first.working_dir, second.working_dir);
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn concurrent_runs_do_not_share_a_tree() {
    let work = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(pipeline(work.path(), static_site(), "exit 1", PUBLISH_OK));

    let a = tokio::spawn({
        let p = pipeline.clone();
        async move { p.run(DeploymentRequest::manual("acme/site").unwrap()).await }
    });
    let b = tokio::spawn({
        let p = pipeline.clone();
        async move { p.run(DeploymentRequest::manual("acme/site").unwrap()).await }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert!(a.is_success(), "{:?}", a.result);
    assert!(b.is_success(), "{:?}", b.result);
    assert_ne!(a.working_dir, b.working_dir);
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn cleanup_failure_does_not_change_a_successful_result() {
    let work = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(RelocatingFetcher {
        to: elsewhere.path().join("moved"),
        succeed: true,
    });
    let pipeline = pipeline(work.path(), fetcher, "exit 1", PUBLISH_OK);
    let before = METRICS.snapshot().cleanup_failures;

    let outcome = pipeline
        .run(DeploymentRequest::manual("acme/site").unwrap())
        .await;

    assert_eq!(outcome.result.as_ref().unwrap().transaction_id, "abc123");
    assert_eq!(outcome.state, PipelineState::CleanedUp { success: true });

    let last = outcome.log.entries().last().unwrap();
    assert_eq!(last.stage, Stage::Cleanup);
    assert_eq!(last.status, StageStatus::Failed);
    assert!(last.message.starts_with("failed to remove working tree"));
    assert!(METRICS.snapshot().cleanup_failures > before);

    let resp = outcome.to_response();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["deployUrl"], "https://arweave.net/abc123");
    let logs = resp.body["logs"].as_str().unwrap();
    assert!(logs.lines().last().unwrap().contains("cleanup failed"));
}

#[tokio::test]
async fn cleanup_failure_keeps_the_original_error() {
    let work = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(RelocatingFetcher {
        to: elsewhere.path().join("moved"),
        succeed: false,
    });
    let pipeline = pipeline(work.path(), fetcher, "exit 1", PUBLISH_OK);
    let before = METRICS.snapshot().cleanup_failures;

    let outcome = pipeline
        .run(DeploymentRequest::manual("acme/gone").unwrap())
        .await;

    assert!(matches!(
        outcome.result,
        Err(PipelineError::Fetch(FetchError::NotFound { .. }))
    ));
    assert_eq!(outcome.state, PipelineState::CleanedUp { success: false });

    let statuses: Vec<(Stage, StageStatus)> = outcome
        .log
        .entries()
        .iter()
        .map(|e| (e.stage, e.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (Stage::Request, StageStatus::Ok),
            (Stage::Fetch, StageStatus::Failed),
            (Stage::Cleanup, StageStatus::Failed),
        ]
    );
    assert!(METRICS.snapshot().cleanup_failures > before);

    let resp = outcome.to_response();
    assert_eq!(resp.status, 500);
    assert_eq!(resp.body["error"], "Repository not found");
    let logs = resp.body["logs"].as_str().unwrap();
    assert!(logs.lines().last().unwrap().contains("cleanup failed"));
}

// ---------------------------------------------------------------------------
// Archive strategy over a local HTTP server
// ---------------------------------------------------------------------------

fn site_zip() -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let opts = zip::write::SimpleFileOptions::default();
        zip.add_directory("acme-site-1a2b3c/", opts).unwrap();
        zip.start_file("acme-site-1a2b3c/index.html", opts).unwrap();
        zip.write_all(b"<h1>zipball</h1>").unwrap();
        zip.finish().unwrap();
    }
    buf.into_inner()
}

/// Serves `body` at `path` and 404 everywhere else, one connection at a time.
async fn serve_archive(path: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            let head = String::from_utf8_lossy(&request);
            let hit = head
                .lines()
                .next()
                .is_some_and(|line| line.split_whitespace().nth(1) == Some(path));
            let (status, payload) = if hit {
                ("200 OK", body.clone())
            } else {
                ("404 Not Found", b"{\"message\":\"Not Found\"}".to_vec())
            };
            let header = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                payload.len()
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(&payload).await.unwrap();
            socket.shutdown().await.ok();
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn archive_strategy_downloads_extracts_and_publishes() {
    let api = serve_archive("/repos/acme/site/zipball", site_zip()).await;
    let work = tempfile::tempdir().unwrap();
    let config = DeployConfig::new("ant-test")
        .with_work_root(work.path())
        .with_api_url(api)
        .with_publish_command(shell_command(
            "test -f dist/index.html || exit 6; echo 'Bundle TxId [zip_tx]'",
        ));
    let pipeline = DeployPipeline::from_config(&config);

    let resp = pipeline
        .handle_raw(None, br#"{"repoUrl":"https://github.com/acme/site"}"#)
        .await;

    assert_eq!(resp.status, 200, "{}", resp.body);
    assert_eq!(resp.body["deployUrl"], "https://arweave.net/zip_tx");
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn archive_strategy_404_is_repository_not_found() {
    let api = serve_archive("/repos/acme/site/zipball", site_zip()).await;
    let work = tempfile::tempdir().unwrap();
    let config = DeployConfig::new("ant-test")
        .with_work_root(work.path())
        .with_api_url(api)
        .with_publish_command(shell_command(PUBLISH_OK));
    let pipeline = DeployPipeline::from_config(&config);

    let resp = pipeline
        .handle(None, &json!({ "repoUrl": "acme/other" }))
        .await;

    assert_eq!(resp.status, 500);
    assert_eq!(resp.body["error"], "Repository not found");
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn archive_strategy_rejects_references_on_other_hosts() {
    let api = serve_archive("/repos/org/site/zipball", site_zip()).await;
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("runs");
    let config = DeployConfig::new("ant-test")
        .with_work_root(&root)
        .with_api_url(api)
        .with_publish_command(shell_command(PUBLISH_OK));
    let pipeline = DeployPipeline::from_config(&config);

    for repo in ["https://gitlab.com/org/site", "file:///srv/repos/org/site.git"] {
        let resp = pipeline.handle(None, &json!({ "repoUrl": repo })).await;
        assert_eq!(resp.status, 400, "{repo}: {}", resp.body);
        let error = resp.body["error"].as_str().unwrap();
        assert!(error.starts_with("Unsupported repository host"), "{error}");
    }
    assert!(!root.exists());
}

// ---------------------------------------------------------------------------
// Clone strategy from a local repository, triggered by a webhook payload
// ---------------------------------------------------------------------------

fn run_git(repo_dir: &Path, args: &[&str]) {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[tokio::test]
async fn webhook_clone_excludes_vcs_metadata_from_staging() {
    let origin = tempfile::tempdir().unwrap();
    let repo = origin.path().join("site");
    std::fs::create_dir_all(&repo).unwrap();
    run_git(&repo, &["init"]);
    run_git(&repo, &["config", "user.name", "test-user"]);
    run_git(&repo, &["config", "user.email", "test@example.com"]);
    std::fs::write(repo.join("index.html"), "<h1>cloned</h1>").unwrap();
    run_git(&repo, &["add", "."]);
    run_git(&repo, &["commit", "-m", "initial"]);

    let work = tempfile::tempdir().unwrap();
    let config = DeployConfig::new("ant-test")
        .with_work_root(work.path())
        .with_fetch_strategy(FetchStrategy::Clone)
        .with_publish_command(shell_command(
            "test -d dist/.git && exit 7; test -d .git || exit 8; echo 'Bundle TxId [git_tx]'",
        ));
    let pipeline = DeployPipeline::from_config(&config);

    let payload = json!({
        "ref": "refs/heads/main",
        "repository": { "clone_url": format!("file://{}", repo.display()) }
    });
    let resp = pipeline.handle(Some("push"), &payload).await;

    assert_eq!(resp.status, 200, "{}", resp.body);
    assert_eq!(resp.body["deployUrl"], "https://arweave.net/git_tx");
    let logs = resp.body["logs"].as_str().unwrap();
    assert!(logs.contains("accepted webhook deployment"));
    assert!(logs.contains("via clone"));
    assert!(dir_is_empty(work.path()));
}

// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Engine Integration Tests
 * End-to-end template execution against mock servers
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use seitti_scanner::core::{MetaInput, ResumeConfig, ScanEngine, SimpleInputProvider};
use seitti_scanner::output::MemoryWriter;
use seitti_scanner::templates::{Template, TemplateLoader, TrustStore};
use seitti_scanner::types::ScanOptions;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_options() -> Arc<ScanOptions> {
    Arc::new(ScanOptions {
        rate_limit: 0,
        timeout: 5,
        ..Default::default()
    })
}

fn write_template(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn load(options: &Arc<ScanOptions>, path: &Path) -> Arc<Template> {
    let loader = TemplateLoader::new(Arc::clone(options), Arc::new(TrustStore::new()));
    loader.load(path).unwrap()
}

fn engine_with_writer(
    options: &Arc<ScanOptions>,
    resume: Arc<ResumeConfig>,
) -> (ScanEngine, Arc<MemoryWriter>) {
    let writer = Arc::new(MemoryWriter::new());
    let sink: Arc<dyn seitti_scanner::output::OutputWriter> = writer.clone() as Arc<dyn seitti_scanner::output::OutputWriter>;
    let engine = ScanEngine::new(Arc::clone(options), sink, resume, None, None);
    (engine, writer)
}

// Scenario: a status matcher against a server that only serves /a.
#[tokio::test]
async fn test_simple_status_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template_path = write_template(
        dir.path(),
        "s1.yaml",
        r#"
id: s1
info:
  name: Status Match
  author: tester
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/a"]
    matchers:
      - type: status
        status: [200]
"#,
    );

    let options = test_options();
    let template = load(&options, &template_path);
    let (engine, writer) = engine_with_writer(&options, Arc::new(ResumeConfig::new()));

    let provider = SimpleInputProvider::new(vec![MetaInput::new(server.uri())]);
    let matched = engine.execute(vec![template], &provider).await;

    assert!(matched);
    let events = writer.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].template_id, "s1");
    assert_eq!(events[0].matched_at, format!("{}/a", server.uri()));
}

// Scenario: and-condition requires both matchers; the body does not
// cooperate.
#[tokio::test]
async fn test_and_condition_no_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not it"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template_path = write_template(
        dir.path(),
        "s2.yaml",
        r#"
id: s2
info:
  name: And Condition
  author: tester
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/a"]
    matchers-condition: and
    matchers:
      - type: status
        status: [200]
      - type: word
        part: body
        words: ["ok"]
"#,
    );

    let options = test_options();
    let template = load(&options, &template_path);
    let (engine, writer) = engine_with_writer(&options, Arc::new(ResumeConfig::new()));

    let provider = SimpleInputProvider::new(vec![MetaInput::new(server.uri())]);
    let matched = engine.execute(vec![template], &provider).await;

    assert!(!matched);
    assert!(writer.take().is_empty());
}

// Scenario: clusterbomb payloads over a raw request hit the server with
// the full cartesian product.
#[tokio::test]
async fn test_clusterbomb_payload_iteration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template_path = write_template(
        dir.path(),
        "s3.yaml",
        r#"
id: s3
info:
  name: Clusterbomb
  author: tester
  severity: info
http:
  - raw:
      - |
        POST /login HTTP/1.1
        Host: {{Hostname}}
        Content-Type: application/x-www-form-urlencoded

        user={{user}}&pass={{pass}}
    attack: clusterbomb
    payloads:
      user: ["a", "b"]
      pass: ["1", "2"]
    matchers:
      - type: status
        status: [200]
"#,
    );

    let options = test_options();
    let template = load(&options, &template_path);
    let (engine, _writer) = engine_with_writer(&options, Arc::new(ResumeConfig::new()));

    let provider = SimpleInputProvider::new(vec![MetaInput::new(server.uri())]);
    engine.execute(vec![template], &provider).await;

    let requests = server.received_requests().await.unwrap();
    let bodies: HashSet<String> = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .collect();
    let expected: HashSet<String> = [
        "user=a&pass=1",
        "user=a&pass=2",
        "user=b&pass=1",
        "user=b&pass=2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(bodies, expected);
    assert_eq!(requests.len(), 4);
}

// Scenario: an internal extractor feeds a workflow child that uses the
// value in its path.
#[tokio::test]
async fn test_extractor_feeds_workflow_child() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tok=xyz"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth"))
        .and(query_param("t", "xyz"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_template(
        dir.path(),
        "extract.yaml",
        r#"
id: flow-extract
info:
  name: Token Extract
  author: tester
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/"]
    extractors:
      - type: regex
        name: token
        internal: true
        regex: ["tok=([a-z]+)"]
        group: 1
"#,
    );
    write_template(
        dir.path(),
        "use.yaml",
        r#"
id: flow-use
info:
  name: Token Use
  author: tester
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/auth?t={{token}}"]
    matchers:
      - type: status
        status: [200]
"#,
    );
    let flow_path = write_template(
        dir.path(),
        "flow.yaml",
        r#"
id: flow
info:
  name: Flow
  author: tester
workflows:
  - template: extract.yaml
    subtemplates:
      - template: use.yaml
"#,
    );

    let options = test_options();
    let template = load(&options, &flow_path);
    let (engine, writer) = engine_with_writer(&options, Arc::new(ResumeConfig::new()));

    let provider = SimpleInputProvider::new(vec![MetaInput::new(server.uri())]);
    let matched = engine.execute(vec![template], &provider).await;

    assert!(matched);
    let events = writer.take();
    let child = events
        .iter()
        .find(|e| e.template_id == "flow-use")
        .expect("child template should have matched");
    assert_eq!(child.matched_at, format!("{}/auth?t=xyz", server.uri()));
}

// Scenario: a refusing host burns exactly max-host-errors connection
// attempts; the rest of the block is skipped.
#[tokio::test]
async fn test_host_error_budget() {
    // grab a port nothing listens on
    let refused_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<String> = (0..10).map(|i| format!("\"{{{{BaseURL}}}}/p{}\"", i)).collect();
    let template_path = write_template(
        dir.path(),
        "s5.yaml",
        &format!(
            r#"
id: s5
info:
  name: Budget
  author: tester
  severity: info
http:
  - method: GET
    path: [{}]
    matchers:
      - type: status
        status: [200]
"#,
            paths.join(", ")
        ),
    );

    let options = Arc::new(ScanOptions {
        rate_limit: 0,
        timeout: 2,
        retries: 1,
        max_host_errors: 3,
        ..Default::default()
    });
    let template = load(&options, &template_path);
    let (engine, writer) = engine_with_writer(&options, Arc::new(ResumeConfig::new()));
    let progress = engine.progress();

    let provider = SimpleInputProvider::new(vec![MetaInput::new(format!(
        "http://127.0.0.1:{}",
        refused_port
    ))]);
    let matched = engine.execute(vec![template], &provider).await;

    assert!(!matched);
    assert!(writer.take().is_empty());
    // exactly three attempts errored, the remaining seven were skipped
    assert_eq!(progress.errors(), 3);
    assert!(progress.skipped() >= 1);
}

// Scenario: resuming an interrupted scan repeats in-flight targets,
// executes untouched ones and skips the completed prefix.
#[tokio::test]
async fn test_resume_skips_completed_targets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template_path = write_template(
        dir.path(),
        "s6.yaml",
        r#"
id: s6
info:
  name: Resume
  author: tester
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}"]
    matchers:
      - type: status
        status: [200]
"#,
    );

    // previous run: targets 0..4 completed, 5 and 6 in flight when the
    // scan was interrupted
    let interrupted = ResumeConfig::new();
    for index in 0..7u32 {
        interrupted.mark_in_flight("s6", index);
    }
    for index in 0..5u32 {
        interrupted.complete("s6", index);
    }
    let resume_path = dir.path().join("scan.resume");
    interrupted.save(&resume_path).unwrap();

    let options = test_options();
    let template = load(&options, &template_path);
    let resume = Arc::new(ResumeConfig::load(&resume_path).unwrap());
    let (engine, writer) = engine_with_writer(&options, resume);

    let targets: Vec<MetaInput> = (0..10)
        .map(|i| MetaInput::new(format!("{}/t{}", server.uri(), i)))
        .collect();
    let provider = SimpleInputProvider::new(targets);
    let matched = engine.execute(vec![template], &provider).await;

    assert!(matched);
    let requests = server.received_requests().await.unwrap();
    let hit_paths: HashSet<String> = requests.iter().map(|r| r.url.path().to_string()).collect();
    let expected: HashSet<String> = ["/t5", "/t6", "/t7", "/t8", "/t9"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(hit_paths, expected, "in-flight and untouched targets only");
    assert_eq!(requests.len(), 5);
    assert_eq!(writer.take().len(), 5);
}

// Clustered templates share one request; both members still match
// independently.
#[tokio::test]
async fn test_clustered_templates_share_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shared"))
        .respond_with(ResponseTemplate::new(200).set_body_string("apache and nginx here"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let options = test_options();
    let loader = TemplateLoader::new(Arc::clone(&options), Arc::new(TrustStore::new()));

    let probe = |id: &str, word: &str| {
        format!(
            r#"
id: {}
info:
  name: Shared Probe
  author: tester
  severity: info
http:
  - method: GET
    path: ["{{{{BaseURL}}}}/shared"]
    matchers:
      - type: word
        words: ["{}"]
"#,
            id, word
        )
    };
    let a = loader
        .load(&write_template(dir.path(), "a.yaml", &probe("cluster-a", "apache")))
        .unwrap();
    let b = loader
        .load(&write_template(dir.path(), "b.yaml", &probe("cluster-b", "nginx")))
        .unwrap();

    let (engine, writer) = engine_with_writer(&options, Arc::new(ResumeConfig::new()));
    let provider = SimpleInputProvider::new(vec![MetaInput::new(server.uri())]);
    let matched = engine.execute(vec![a, b], &provider).await;

    assert!(matched);
    let ids: HashSet<String> = writer.take().into_iter().map(|e| e.template_id).collect();
    assert_eq!(
        ids,
        ["cluster-a", "cluster-b"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    );
    // one request on the wire for two templates
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

// stop-at-first-match drops the remaining payload iterations for the
// matching pair.
#[tokio::test]
async fn test_stop_at_first_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template_path = write_template(
        dir.path(),
        "stop.yaml",
        r#"
id: stop-probe
info:
  name: Stop At First
  author: tester
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/{{word}}"]
    stop-at-first-match: true
    payloads:
      word: ["one", "two", "three", "four"]
    matchers:
      - type: status
        status: [200]
"#,
    );

    let options = test_options();
    let template = load(&options, &template_path);
    let (engine, _writer) = engine_with_writer(&options, Arc::new(ResumeConfig::new()));
    let provider = SimpleInputProvider::new(vec![MetaInput::new(server.uri())]);
    engine.execute(vec![template], &provider).await;

    // the first payload matches; the other three are never sent
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

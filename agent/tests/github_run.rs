//! A full run against a mocked GitHub REST API.
//!
//! The model is scripted; every host call goes over HTTP to `httpmock`, so
//! the endpoints, payloads and ordering of the GitHub adapter are exercised
//! together with the orchestrator.

use agent::io::config::{AgentConfig, GithubConfig};
use agent::io::github::GithubClient;
use agent::io::run_store::InMemoryRunStore;
use agent::orchestrator::{RunRequest, RunStop, run_agent};
use agent::test_support::{ScriptedModel, calls_reply, repo, text_reply, tool_call};
use httpmock::prelude::*;
use serde_json::json;

fn github(server: &MockServer) -> GithubClient {
    GithubClient::new(
        &GithubConfig {
            api_base: server.base_url(),
            request_timeout_secs: 5,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        },
        "gh-token",
    )
    .expect("github client")
}

#[tokio::test]
async fn upsert_then_pull_request_over_http() {
    let server = MockServer::start();
    let repository = server.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets");
        then.status(200).json_body(json!({"default_branch": "main"}));
    });
    let missing_branch = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/git/ref/heads/agent/fix-fix-bug");
        then.status(404).json_body(json!({"message": "Not Found"}));
    });
    let main_branch = server.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/git/ref/heads/main");
        then.status(200)
            .json_body(json!({"ref": "refs/heads/main", "object": {"sha": "abc123", "type": "commit"}}));
    });
    let create_ref = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/git/refs")
            .json_body(json!({"ref": "refs/heads/agent/fix-fix-bug", "sha": "abc123"}));
        then.status(201).json_body(json!({"ref": "refs/heads/agent/fix-fix-bug"}));
    });
    let missing_file = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/contents/src/fix.rs")
            .query_param("ref", "agent/fix-fix-bug");
        then.status(404).json_body(json!({"message": "Not Found"}));
    });
    let put_file = server.mock(|when, then| {
        when.method(PUT)
            .path("/repos/acme/widgets/contents/src/fix.rs")
            .json_body(json!({
                "message": "Add fix",
                "content": "Ly8gZml4ZWQ=",
                "branch": "agent/fix-fix-bug"
            }));
        then.status(201).json_body(json!({"content": {"sha": "def456"}}));
    });
    let pulls = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/pulls")
            .body_contains("\"title\":\"Fix: Fix bug\"")
            .body_contains("\"head\":\"agent/fix-fix-bug\"")
            .body_contains("\"base\":\"main\"")
            .body_contains("Automated PR for: Crash on empty input");
        then.status(201).json_body(json!({
            "number": 7,
            "html_url": "https://github.com/acme/widgets/pull/7"
        }));
    });

    let model = ScriptedModel::new(vec![
        calls_reply(vec![tool_call(
            "call-1",
            "upsert_file",
            json!({
                "repo_id": "acme/widgets",
                "path": "src/fix.rs",
                "new_content": "// fixed",
                "commit_message": "Add fix",
                "branch": "agent/fix-fix-bug"
            }),
        )]),
        text_reply("Added src/fix.rs."),
    ]);
    let host = github(&server);
    let store = InMemoryRunStore::new();
    let request = RunRequest {
        repo: repo("acme/widgets"),
        issue_title: "Fix bug".to_string(),
        issue_description: "Crash on empty input".to_string(),
    };

    let outcome = run_agent(&model, &host, &store, &AgentConfig::default(), request)
        .await
        .expect("run");

    assert_eq!(outcome.stop, RunStop::Completed);
    assert_eq!(outcome.result, "PR Created: https://github.com/acme/widgets/pull/7");
    assert_eq!(outcome.pull_request.map(|pr| pr.number), Some(7));
    let tool_result = model.requests()[1].last().cloned().expect("tool result");
    assert_eq!(tool_result.content, "Created src/fix.rs on agent/fix-fix-bug");

    missing_branch.assert_hits(1);
    main_branch.assert_hits(1);
    create_ref.assert_hits(1);
    missing_file.assert_hits(1);
    put_file.assert_hits(1);
    pulls.assert_hits(1);
    repository.assert_hits(2);
}

#[tokio::test]
async fn rejected_pull_request_is_the_run_result() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets");
        then.status(200).json_body(json!({"default_branch": "main"}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/repos/acme/widgets/pulls");
        then.status(422).json_body(json!({
            "message": "Validation Failed",
            "errors": [{"message": "A pull request already exists for acme:agent/fix-fix-bug."}]
        }));
    });

    let model = ScriptedModel::new(vec![text_reply("Already fixed upstream.")]);
    let request = RunRequest {
        repo: repo("acme/widgets"),
        issue_title: "Fix bug".to_string(),
        issue_description: String::new(),
    };

    let outcome = run_agent(
        &model,
        &github(&server),
        &InMemoryRunStore::new(),
        &AgentConfig::default(),
        request,
    )
    .await
    .expect("finalize failure is not fatal");

    assert!(outcome.result.starts_with("PR Failed: "));
    assert!(outcome.result.contains("A pull request already exists"));
}

mod common;

use agent_mesh::config::Settings;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{runtime_with, ScriptedProvider};
use serde_json::Value;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

#[test]
fn test_load_config_file() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("agent-mesh.toml");

    let config = r#"
[server]
host = "0.0.0.0"
port = 9100

[backend]
base_url = "http://gpu-box:11434/api"
request_timeout_secs = 60

[limits]
max_sessions = 5
max_delegation_depth = 2

[delegation]
sibling_host = "mesh.internal"

[[agents]]
name = "planner"
port = 9001
model = "llama3:8b"
role = "Plans the work"

[[agents]]
name = "coder"
port = 9002
model = "qwen3:32b"
role = "Writes the code"
color = "blue"
url = "http://coder.internal:9002"

[agents.capabilities]
multimodal = true
"#;
    fs::write(&path, config)?;

    let settings = Settings::from_path(&path)?;

    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, Some(9100));
    assert_eq!(settings.backend.base_url, "http://gpu-box:11434/api");
    assert_eq!(settings.backend.request_timeout_secs, 60);
    assert_eq!(settings.backend.connect_timeout_secs, 10);
    assert_eq!(settings.limits.max_sessions, 5);
    assert_eq!(settings.limits.max_delegation_depth, 2);
    assert_eq!(settings.limits.max_message_bytes, 100_000);
    assert_eq!(settings.delegation.sibling_host, "mesh.internal");

    assert_eq!(settings.agents.len(), 2);
    let planner = settings.agent("planner").unwrap();
    assert_eq!(planner.color, "white");
    assert!(planner.capabilities.streaming);
    let coder = settings.agent("coder").unwrap();
    assert_eq!(coder.url.as_deref(), Some("http://coder.internal:9002"));
    assert!(coder.capabilities.multimodal);

    Ok(())
}

#[test]
fn test_missing_file_uses_defaults() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = Settings::from_path(&temp_dir.path().join("absent.toml"))?;

    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.backend.base_url, "http://localhost:11434/api");
    assert_eq!(settings.agents.len(), 11);
    Ok(())
}

#[test]
fn test_invalid_config_reports_every_problem() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("agent-mesh.toml");

    let config = r#"
[backend]
base_url = "ftp://nowhere"

[limits]
max_sessions = 0

[[agents]]
name = "twin"
port = 9001
model = "m"
role = "first"

[[agents]]
name = "twin"
port = 9002
model = "m"
role = "second"
"#;
    fs::write(&path, config)?;

    let err = Settings::from_path(&path).unwrap_err().to_string();
    assert!(err.contains("backend.base_url"), "{err}");
    assert!(err.contains("limits.max_sessions"), "{err}");
    assert!(err.contains("twin"), "{err}");
    Ok(())
}

#[tokio::test]
async fn test_configured_limits_apply() {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = common::settings_with_urls(&[]);
    settings.limits.max_sessions = 2;
    settings.sessions.dump_dir = Some(temp_dir.path().to_path_buf());

    let app = runtime_with(settings, "code", Arc::new(ScriptedProvider::new("ok"))).app();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(Request::post("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        ids.push(body["session_id"].as_str().unwrap().to_string());
    }

    let response = app
        .clone()
        .oneshot(Request::get("/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let listing: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(listing["total"], 2);

    // Closing writes the session out to the dump directory
    let response = app
        .clone()
        .oneshot(
            Request::delete(format!("/sessions/{}", ids[2]))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let dumped = fs::read_to_string(temp_dir.path().join(format!("{}.json", ids[2]))).unwrap();
    let session: Value = serde_json::from_str(&dumped).unwrap();
    assert_eq!(session["id"], ids[2].as_str());
}

//! Integration tests for the skin backend.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::{Config, LogFormat, ModelConfig};
use crate::db::{init_database, Repository};
use crate::generation::provider::testing::{Script, ScriptedProvider};
use crate::generation::{GenerationError, GenerationOptions, ThemeGenerator};
use crate::models::{SaveSkinRequest, SkinContent};
use crate::relay::{SessionRegistry, SESSION_IDLE_TTL};
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    repo: Arc<Repository>,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_provider(ScriptedProvider::new(Vec::new())).await
    }

    async fn with_scripts(scripts: Vec<Script>) -> Self {
        Self::with_provider(ScriptedProvider::new(scripts)).await
    }

    async fn with_provider(provider: ScriptedProvider) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        // Create config
        let config = Config {
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            log_format: LogFormat::Pretty,
            scope_selector: ".custom-skin-unified".to_string(),
            model: ModelConfig::default(),
        };

        let generator = Arc::new(ThemeGenerator::new(
            Arc::new(provider),
            GenerationOptions::from(&config.model),
        ));

        let sessions = Arc::new(SessionRegistry::new(
            generator.options().history_limit,
            SESSION_IDLE_TTL,
        ));

        let state = AppState {
            repo: repo.clone(),
            generator,
            sessions,
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        TestFixture {
            client: Client::new(),
            base_url,
            repo,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn put_skin(&self, blog_id: &str, body: Value) -> reqwest::Response {
        self.client
            .put(self.url(&format!("/api/blogs/{}/skin", blog_id)))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// POST a generation request and collect the decoded event frames.
    async fn stream_events(&self, path: &str, body: Value) -> Vec<Value> {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let text = resp.text().await.unwrap();
        text.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }
}

fn render_source() -> Value {
    json!({
        "blog": { "id": "b1", "name": "Tea Notes" },
        "posts": [
            { "id": "p1", "title": "Oolong", "createdAt": "2024-03-05", "content": "<p>Roasted</p>" },
            { "id": "p2", "title": "Sencha", "createdAt": "2024-03-01" }
        ]
    })
}

fn event_types(events: &[Value]) -> Vec<&str> {
    events
        .iter()
        .map(|e| e["type"].as_str().unwrap_or_default())
        .collect()
}

// ============================================================================
// Health Check
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

// ============================================================================
// Skin Storage
// ============================================================================

#[tokio::test]
async fn test_get_missing_skin() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/blogs/nobody/skin"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_save_and_get_skin() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .put_skin(
            "b1",
            json!({
                "html_template": "<h1>{{blog_name}}</h1>",
                "custom_css": "h1 { color: teal; }"
            }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["version"], 1);
    assert_eq!(body["data"]["isActive"], false);

    let resp = fixture
        .client
        .get(fixture.url("/api/blogs/b1/skin"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["blogId"], "b1");
    assert_eq!(body["data"]["html_template"], "<h1>{{blog_name}}</h1>");
    assert_eq!(body["data"]["custom_css"], "h1 { color: teal; }");
    assert_eq!(body["data"]["html_footer"], "");
}

#[tokio::test]
async fn test_save_is_wholesale_overwrite() {
    let fixture = TestFixture::new().await;

    fixture
        .put_skin(
            "b1",
            json!({ "html_header": "<header>a</header>", "html_footer": "<footer>b</footer>" }),
        )
        .await;
    let resp = fixture
        .put_skin("b1", json!({ "html_header": "<header>c</header>" }))
        .await;

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["version"], 2);
    assert_eq!(body["data"]["html_header"], "<header>c</header>");
    assert_eq!(body["data"]["html_footer"], "");
}

#[tokio::test]
async fn test_version_conflict() {
    let fixture = TestFixture::new().await;

    fixture.put_skin("b1", json!({ "custom_css": "a{}" })).await;
    fixture.put_skin("b1", json!({ "custom_css": "b{}" })).await;

    // Try to save with a stale version
    let resp = fixture
        .put_skin("b1", json!({ "custom_css": "c{}", "expectedVersion": 1 }))
        .await;
    assert_eq!(resp.status(), 409);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["currentVersion"], 2);

    // The matching version goes through
    let resp = fixture
        .put_skin("b1", json!({ "custom_css": "c{}", "expectedVersion": 2 }))
        .await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_replace_section() {
    let fixture = TestFixture::new().await;

    fixture
        .put_skin(
            "b1",
            json!({ "html_header": "<header>keep</header>", "html_footer": "<footer>old</footer>" }),
        )
        .await;

    let resp = fixture
        .client
        .put(fixture.url("/api/blogs/b1/skin/sections/html_footer"))
        .json(&json!({ "content": "<footer>new</footer>" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["html_footer"], "<footer>new</footer>");
    assert_eq!(body["data"]["html_header"], "<header>keep</header>");

    // Unknown section names are rejected
    let resp = fixture
        .client
        .put(fixture.url("/api/blogs/b1/skin/sections/html_banner"))
        .json(&json!({ "content": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_activate_and_reset() {
    let fixture = TestFixture::new().await;

    // Activating a missing skin
    let resp = fixture
        .client
        .post(fixture.url("/api/blogs/b1/skin/active"))
        .json(&json!({ "isActive": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    fixture
        .put_skin("b1", json!({ "html_template": "<p>hi</p>" }))
        .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/blogs/b1/skin/active"))
        .json(&json!({ "isActive": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["isActive"], true);

    let resp = fixture
        .client
        .delete(fixture.url("/api/blogs/b1/skin"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["isActive"], false);
    assert!(body["data"].get("html_template").is_none());
    assert_eq!(body["data"]["custom_css"], "");

    // The row is kept
    let resp = fixture
        .client
        .get(fixture.url("/api/blogs/b1/skin"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // An empty skin cannot be activated
    let resp = fixture
        .client
        .post(fixture.url("/api/blogs/b1/skin/active"))
        .json(&json!({ "isActive": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_migrate_legacy_skins() {
    let fixture = TestFixture::new().await;

    let legacy = SaveSkinRequest {
        content: SkinContent {
            html_header: "<header>{{blog_name}}</header>".to_string(),
            html_post_item: "<article>{{post_title}}</article>".to_string(),
            custom_css: "header { color: red; }".to_string(),
            ..SkinContent::default()
        },
        is_active: Some(true),
        expected_version: None,
    };
    fixture.repo.save_skin("legacy", &legacy).await.unwrap();
    fixture
        .repo
        .save_skin(
            "unified",
            &SaveSkinRequest {
                content: SkinContent::starter(),
                is_active: None,
                expected_version: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(fixture.repo.migrate_legacy_skins().await.unwrap(), 1);
    // Running again finds nothing left to convert
    assert_eq!(fixture.repo.migrate_legacy_skins().await.unwrap(), 0);

    let skin = fixture.repo.get_skin("legacy").await.unwrap().unwrap();
    assert!(skin.content.is_unified());
    assert!(skin.is_active);
    assert_eq!(skin.version, 2);
    assert_eq!(skin.content.custom_css, "header { color: red; }");
    let template = skin.content.html_template.unwrap_or_default();
    assert!(template.contains("<header>{{blog_name}}</header>"));
}

// ============================================================================
// Rendering
// ============================================================================

#[tokio::test]
async fn test_render_requires_active_skin() {
    let fixture = TestFixture::new().await;

    fixture
        .put_skin("b1", json!({ "html_template": "<h1>{{blog_name}}</h1>" }))
        .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/blogs/b1/skin/render"))
        .json(&json!({ "source": render_source() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Preview mode renders inactive skins
    let resp = fixture
        .client
        .post(fixture.url("/api/blogs/b1/skin/render"))
        .json(&json!({ "source": render_source(), "preview": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["html"], "<h1>Tea Notes</h1>");
}

#[tokio::test]
async fn test_render_sanitizes_and_scopes() {
    let fixture = TestFixture::new().await;

    fixture
        .put_skin(
            "b1",
            json!({
                "html_template": "<div onclick=\"steal()\">{{#posts}}<h2>{{post_title}}</h2>{{/posts}}<script>alert(1)</script></div>",
                "custom_css": ".title { color: red; }\nbody { margin: 0; }",
                "isActive": true
            }),
        )
        .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/blogs/b1/skin/render"))
        .json(&json!({ "source": render_source() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let data = &body["data"];

    assert_eq!(data["html"], "<div><h2>Oolong</h2><h2>Sencha</h2></div>");
    let css = data["css"].as_str().unwrap();
    assert!(css.contains(".custom-skin-unified .title"));
    assert!(!css.contains("body"));
    assert_eq!(data["container"], ".custom-skin-unified");
    assert_eq!(data["sandbox"], "allow-popups allow-popups-to-escape-sandbox");

    let document = data["document"].as_str().unwrap();
    assert!(document.contains("<div class=\"custom-skin-unified\">"));
    assert!(document.contains("<title>Tea Notes</title>"));
}

#[tokio::test]
async fn test_preview_unsaved_skin() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/skins/preview"))
        .json(&json!({
            "html_template": "{{#if no_posts}}<p>empty</p>{{/if}}<p>{{post_count}} posts</p>",
            "custom_css": "p { color: blue; }",
            "source": render_source()
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["html"], "<p>2 posts</p>");

    // Nothing to preview
    let resp = fixture
        .client
        .post(fixture.url("/api/skins/preview"))
        .json(&json!({ "source": render_source() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_skin_defaults() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/skins/defaults"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let data = &body["data"];
    assert!(data["html_template"]
        .as_str()
        .unwrap()
        .contains("{{blog_name}}"));
    assert!(!data["custom_css"].as_str().unwrap().is_empty());
    assert!(data["vocabulary"]["blog"].as_array().unwrap().len() > 5);
}

// ============================================================================
// Generation
// ============================================================================

#[tokio::test]
async fn test_generate_theme() {
    let fixture = TestFixture::with_scripts(vec![Script::Reply(
        json!({
            "html_template": "<div class=\"forest\">{{blog_name}}</div>",
            "custom_css": ".forest { background: green; }",
            "message": "A forest theme."
        })
        .to_string(),
    )])
    .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/ai/generate"))
        .json(&json!({ "messages": [{ "role": "user", "content": "forest" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "A forest theme.");
    assert_eq!(
        body["sections"]["html_template"],
        "<div class=\"forest\">{{blog_name}}</div>"
    );
    assert_eq!(body["sections"]["custom_css"], ".forest { background: green; }");
}

#[tokio::test]
async fn test_generate_requires_user_message() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/ai/generate"))
        .json(&json!({ "messages": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_generate_model_unreachable() {
    let fixture = TestFixture::with_scripts(vec![Script::Fail(GenerationError::Unreachable(
        "connection refused".to_string(),
    ))])
    .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/ai/generate"))
        .json(&json!({ "messages": [{ "role": "user", "content": "forest" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "MODEL_UNAVAILABLE");
}

#[tokio::test]
async fn test_generate_unparsable_output() {
    let fixture =
        TestFixture::with_scripts(vec![Script::Reply("I cannot help with that".to_string())])
            .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/ai/generate"))
        .json(&json!({ "messages": [{ "role": "user", "content": "forest" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "GENERATION_FAILED");
}

#[tokio::test]
async fn test_chat_stream_relays_chunks() {
    let fixture = TestFixture::with_scripts(vec![Script::Chunks(vec![
        "Try a ".to_string(),
        "darker footer.".to_string(),
    ])])
    .await;

    let events = fixture
        .stream_events(
            "/api/ai/chat/stream",
            json!({
                "messages": [{ "role": "user", "content": "footer ideas?" }],
                "activeSection": "html_footer",
                "currentCode": "<footer>old</footer>"
            }),
        )
        .await;

    assert_eq!(
        event_types(&events),
        vec!["connected", "chunk", "chunk", "done"]
    );
    assert_eq!(events[1]["content"], "Try a ");
    assert_eq!(events[2]["content"], "darker footer.");
}

#[tokio::test]
async fn test_chat_stream_error_event() {
    let fixture = TestFixture::with_scripts(vec![Script::ChunksThenFail(
        vec!["partial".to_string()],
        GenerationError::Unreachable("reset".to_string()),
    )])
    .await;

    let events = fixture
        .stream_events(
            "/api/ai/chat/stream",
            json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        )
        .await;

    assert_eq!(event_types(&events), vec!["connected", "chunk", "error"]);
    assert!(events[2]["error"].as_str().unwrap().contains("reset"));
}

#[tokio::test]
async fn test_chat_stream_rejects_missing_user_message() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/ai/chat/stream"))
        .json(&json!({ "messages": [{ "role": "assistant", "content": "hello" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_theme_stream_pipeline() {
    let fixture = TestFixture::with_scripts(vec![
        Script::Reply(json!({ "html_template": "<main>{{blog_name}}</main>" }).to_string()),
        Script::Reply(json!({ "custom_css": "main { color: teal; }" }).to_string()),
    ])
    .await;

    let events = fixture
        .stream_events(
            "/api/ai/theme/stream",
            json!({ "messages": [{ "role": "user", "content": "ocean" }] }),
        )
        .await;

    assert_eq!(
        event_types(&events),
        vec!["connected", "progress", "chunk", "progress", "chunk", "done"]
    );
    assert_eq!(events[1]["current"], 1);
    assert_eq!(events[1]["total"], 2);

    // Every chunk is a complete snapshot of the artifact
    let last: Value = serde_json::from_str(events[4]["content"].as_str().unwrap()).unwrap();
    assert_eq!(last["sections"]["html_template"], "<main>{{blog_name}}</main>");
    assert_eq!(last["sections"]["custom_css"], "main { color: teal; }");
}

#[tokio::test]
async fn test_model_health() {
    let fixture = TestFixture::with_provider(ScriptedProvider::unavailable()).await;

    let resp = fixture
        .client
        .get(fixture.url("/api/ai/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "unavailable");
    assert_eq!(body["available"], false);
    assert_eq!(body["modelLoaded"], false);
}

#[tokio::test]
async fn test_cancel_session_closes_stream_with_done() {
    let fixture = TestFixture::with_scripts(vec![Script::ChunksThenHang(vec![
        "Sure, gre".to_string(),
    ])])
    .await;

    let mut resp = fixture
        .client
        .post(fixture.url("/api/ai/chat/stream"))
        .json(&json!({
            "sessionId": "chat-1",
            "messages": [{ "role": "user", "content": "make it green" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-session-id"], "chat-1");

    let view: Value = fixture
        .client
        .get(fixture.url("/api/ai/sessions/chat-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["data"]["busy"], true);

    // Wait for the partial reply before cancelling
    let mut text = String::new();
    while !text.contains(r#""type":"chunk""#) {
        let bytes = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
            .await
            .expect("chunk arrived")
            .unwrap()
            .expect("stream still open");
        text.push_str(&String::from_utf8_lossy(&bytes));
    }

    let cancel: Value = fixture
        .client
        .post(fixture.url("/api/ai/sessions/chat-1/cancel"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancel["data"]["cancelled"], true);

    let rest = tokio::time::timeout(Duration::from_secs(5), resp.text())
        .await
        .expect("stream closed after cancel")
        .unwrap();
    text.push_str(&rest);
    let events: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();
    let types = event_types(&events);
    assert_eq!(types.first(), Some(&"connected"));
    assert_eq!(types.last(), Some(&"done"));
    assert_eq!(types.iter().filter(|t| **t == "done" || **t == "error").count(), 1);

    // The stopped partial lands in the session once the relay reports back
    let mut turns = Value::Null;
    for _ in 0..50 {
        let view: Value = fixture
            .client
            .get(fixture.url("/api/ai/sessions/chat-1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if view["data"]["busy"] == false {
            turns = view["data"]["turns"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(turns[0]["content"], "make it green");
    assert_eq!(turns[1]["content"], "Sure, gre\n\n[stopped]");
}

#[tokio::test]
async fn test_unknown_session_routes() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/ai/sessions/nope/cancel"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = fixture
        .client
        .get(fixture.url("/api/ai/sessions/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_stream_rejects_malformed_session_id() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/ai/theme/stream"))
        .json(&json!({
            "sessionId": "has spaces",
            "messages": [{ "role": "user", "content": "ocean" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

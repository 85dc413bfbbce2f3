//! Chat-with-paper endpoint

use axum::{extract::State, Json};
use serde::Deserialize;

use super::parse_id;
use crate::auth::AuthUser;
use crate::error::{Error, Result};
use crate::server::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub study_id: Option<String>,
    #[serde(default)]
    pub chat_history: Option<serde_json::Value>,
}

/// POST /studies/chat-with-paper - Ask the chat program about a study
pub async fn chat_with_paper(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>> {
    let prompt = request.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let study_id = request.study_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let (Some(prompt), Some(study_id)) = (prompt, study_id) else {
        return Err(Error::bad_request("Prompt and studyId are required."));
    };

    let id = parse_id(study_id, "study")?;
    let study = state.db().get(&id)?.ok_or_else(|| Error::not_found("Study"))?;

    let history = request
        .chat_history
        .filter(|h| h.is_array())
        .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));

    let reply = state.chat().ask(prompt, &study.abstract_text, &history).await?;

    state
        .activity()
        .record_chat(
            &user,
            study_id,
            &serde_json::json!({
                "chatHistory": history,
                "prompt": prompt,
                "response": reply,
            }),
        )
        .await;

    Ok(Json(reply))
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::*;
    use crate::types::{NewStudy, StudyRecord};
    use axum::http::StatusCode;
    use serde_json::json;

    fn seed(app: &TestApp) -> StudyRecord {
        let study = StudyRecord::new(
            OWNER,
            NewStudy {
                title: "Paper".into(),
                abstract_text: "Context text".into(),
                brief_description: "B".into(),
                ..Default::default()
            },
        )
        .unwrap();
        app.state.db().insert(&study).unwrap();
        study
    }

    #[tokio::test]
    async fn test_request_validation() {
        let app = TestApp::new().await;
        let study = seed(&app);

        let (status, _) = app
            .post_json("/studies/chat-with-paper", Some(TOKEN), json!({"studyId": study.id}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post_json(
                "/studies/chat-with-paper",
                Some(TOKEN),
                json!({"prompt": "hi", "studyId": uuid::Uuid::new_v4()}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .post_json("/studies/chat-with-paper", None, json!({"prompt": "hi", "studyId": study.id}))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_script_is_server_error() {
        let app = TestApp::new().await;
        let study = seed(&app);

        let (status, body) = app
            .post_json(
                "/studies/chat-with-paper",
                Some(TOKEN),
                json!({"prompt": "hi", "studyId": study.id}),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["type"], "internal_error");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_failure_detail_depends_on_environment() {
        const SCRIPT: &str = "#!/bin/sh\necho 'Traceback: secret at /srv/internal/path' >&2\nexit 1\n";

        let dev = TestApp::new().await;
        let study = seed(&dev);
        std::fs::write(dev.root().join("chat.sh"), SCRIPT).unwrap();
        let (status, body) = dev
            .post_json(
                "/studies/chat-with-paper",
                Some(TOKEN),
                json!({"prompt": "hi", "studyId": study.id}),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["type"], "process_error");
        assert!(body["error"]["stderr"].as_str().unwrap().contains("Traceback"));

        let prod = TestApp::production().await;
        let study = seed(&prod);
        std::fs::write(prod.root().join("chat.sh"), SCRIPT).unwrap();
        let (status, body) = prod
            .post_json(
                "/studies/chat-with-paper",
                Some(TOKEN),
                json!({"prompt": "hi", "studyId": study.id}),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "Something broke on the server!");
        assert!(body["error"].get("stderr").is_none());
        assert!(!body.to_string().contains("/srv/internal/path"));

        // Client errors are untouched in production
        let (status, body) = prod
            .post_json("/studies/chat-with-paper", Some(TOKEN), json!({"studyId": study.id}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Prompt and studyId are required.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chat_round_trip_is_logged() {
        let app = TestApp::new().await;
        let study = seed(&app);
        std::fs::write(
            app.root().join("chat.sh"),
            "#!/bin/sh\necho 'loading'\necho \"{\\\"response\\\": \\\"$4\\\"}\"\n",
        )
        .unwrap();

        let (status, body) = app
            .post_json(
                "/studies/chat-with-paper",
                Some(TOKEN),
                json!({"prompt": "What is it?", "studyId": study.id, "chatHistory": []}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Context text");

        let log = std::fs::read_to_string(app.state.activity().chat_path()).unwrap();
        assert!(log.contains(&format!("Study ID: {}", study.id)));
        assert!(log.contains("What is it?"));
    }
}

mod support;

use agent_provider::{RunRole, TraceEvent, TraceKind};
use agno_chat::app::{ChatError, RunState};
use serde_json::json;
use session_store::{Attachment, Feedback, MemoryStorage, Role};
use support::{app, app_with_storage, texts, HostSpy};

#[test]
fn first_send_appends_user_and_streaming_placeholder_and_titles_session() {
    let mut app = app();
    let mut host = HostSpy::new(1);

    let session_id = app.send(&mut host, "Hello", Vec::new()).expect("send");

    let session = app.current_session().expect("selected session");
    assert_eq!(session.id, session_id);
    assert_eq!(session.title, "Hello");
    assert_eq!(session.messages.roles(), vec![Role::User, Role::Assistant]);
    let placeholder = session.messages.get(1).expect("placeholder");
    assert!(placeholder.is_streaming);
    assert_eq!(placeholder.text, "");
    assert_eq!(placeholder.agent_name.as_deref(), Some("Orchestrator"));
    assert_eq!(
        app.run_state(&session_id),
        &RunState::Streaming {
            run_id: 1,
            placeholder_id: placeholder.id.clone(),
        }
    );

    let start = host.last_start();
    assert_eq!(start.session_id, session_id);
    assert_eq!(start.agent_id, "general");
    assert_eq!(start.messages.len(), 1);
    assert_eq!(start.messages[0].role, RunRole::User);
    assert_eq!(start.messages[0].text, "Hello");
}

#[test]
fn long_first_message_title_is_truncated() {
    let mut app = app();
    let mut host = HostSpy::new(1);

    app.send(
        &mut host,
        "Please summarize the quarterly report for me",
        Vec::new(),
    )
    .expect("send");

    assert_eq!(
        app.current_session().map(|s| s.title.as_str()),
        Some("Please summarize the quarterly...")
    );
}

#[test]
fn content_then_completion_override_sets_final_text() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    app.send(&mut host, "Hello", Vec::new()).expect("send");

    app.on_run_started(1);
    app.on_run_content(1, "Hi");
    assert_eq!(texts(&app), vec!["Hello", "Hi"]);
    app.on_run_content(1, "Hi there");
    assert_eq!(texts(&app), vec!["Hello", "Hi there"]);
    app.on_run_completed(1, "Hi there!".to_string(), Some(json!({"tokens": 3})));

    let reply = app
        .current_messages()
        .and_then(|log| log.last())
        .cloned()
        .expect("reply");
    assert_eq!(reply.text, "Hi there!");
    assert!(!reply.is_streaming);
    assert_eq!(reply.metrics, Some(json!({"tokens": 3})));
    assert_eq!(app.current_run_state(), &RunState::Idle);
}

#[test]
fn streaming_updates_never_reorder_messages() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    app.send(&mut host, "one", Vec::new()).expect("send");
    app.on_run_completed(1, "first".to_string(), None);
    app.send(&mut host, "two", Vec::new()).expect("send");

    let ids_before: Vec<String> = app
        .current_messages()
        .map(|log| log.iter().map(|m| m.id.clone()).collect())
        .unwrap_or_default();
    app.on_run_content(2, "sec");
    app.on_run_trace(2, TraceEvent::new(TraceKind::Tool, "Calling search"));
    app.on_run_content(2, "second");
    let ids_after: Vec<String> = app
        .current_messages()
        .map(|log| log.iter().map(|m| m.id.clone()).collect())
        .unwrap_or_default();

    assert_eq!(ids_before, ids_after);
    assert_eq!(texts(&app), vec!["one", "first", "two", "second"]);
}

#[test]
fn failure_renders_error_into_placeholder_and_returns_to_idle() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    let session_id = app.send(&mut host, "Hello", Vec::new()).expect("send");
    app.on_run_content(1, "partial");

    app.on_run_failed(1, "HTTP 503 Service Unavailable overloaded");

    let reply = app
        .current_messages()
        .and_then(|log| log.last())
        .cloned()
        .expect("reply");
    assert_eq!(reply.text, "Error: HTTP 503 Service Unavailable overloaded");
    assert!(!reply.is_streaming);
    assert_eq!(app.run_state(&session_id), &RunState::Idle);
    assert_eq!(
        app.last_error(&session_id),
        Some("HTTP 503 Service Unavailable overloaded")
    );

    app.send(&mut host, "again", Vec::new()).expect("idle after error");
    assert_eq!(app.last_error(&session_id), None);
}

#[test]
fn second_send_while_streaming_is_rejected_without_mutation() {
    let storage = MemoryStorage::new();
    let mut app = app_with_storage(&storage);
    let mut host = HostSpy::new(1);
    let session_id = app.send(&mut host, "Hello", Vec::new()).expect("send");
    app.on_run_content(1, "Hi");
    let before = app.current_session().cloned();
    let saves = storage.save_count();

    let error = app
        .send(&mut host, "Another", Vec::new())
        .expect_err("single flight per session");

    assert!(matches!(error, ChatError::RunInFlight { session_id: ref id } if *id == session_id));
    assert_eq!(app.current_session().cloned(), before);
    assert_eq!(storage.save_count(), saves);
    assert_eq!(host.started.len(), 1);

    app.on_run_completed(1, "Hi".to_string(), None);
    assert_eq!(texts(&app), vec!["Hello", "Hi"]);
}

#[test]
fn empty_send_is_rejected() {
    let mut app = app();
    let mut host = HostSpy::new(1);

    assert!(matches!(
        app.send(&mut host, "   ", Vec::new()),
        Err(ChatError::EmptyMessage)
    ));
    assert!(host.started.is_empty());
}

#[test]
fn attachments_only_send_keeps_default_title_and_forwards_attachment() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    let attachment = Attachment {
        mime_type: "image/png".to_string(),
        data: "aGVsbG8=".to_string(),
        name: Some("chart.png".to_string()),
    };

    app.send(&mut host, "", vec![attachment]).expect("send");

    assert_eq!(app.current_session().map(|s| s.title.as_str()), Some("New Chat"));
    assert_eq!(host.last_start().messages[0].attachments.len(), 1);
    assert_eq!(
        host.last_start().messages[0].attachments[0].name.as_deref(),
        Some("chart.png")
    );
}

#[test]
fn traces_are_mirrored_to_live_list_and_placeholder_logs() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    app.send(&mut host, "Find flights", Vec::new()).expect("send");

    app.on_run_trace(
        1,
        TraceEvent::new(TraceKind::Router, "Routing to travel agent")
            .with_agent_name(Some("Router".to_string())),
    );
    app.on_run_trace(
        1,
        TraceEvent::new(TraceKind::Tool, "Calling search_flights")
            .with_detail(Some(json!({"from": "SFO"}))),
    );

    let titles: Vec<&str> = app.live_trace().iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["Routing to travel agent", "Calling search_flights"]);
    let placeholder = app
        .current_messages()
        .and_then(|log| log.last())
        .cloned()
        .expect("placeholder");
    assert_eq!(placeholder.logs.len(), 2);
    assert_eq!(placeholder.logs[0].kind, TraceKind::Router);
    assert_eq!(placeholder.logs[0].agent_name.as_deref(), Some("Router"));
    assert_eq!(placeholder.logs[1].detail, Some(json!({"from": "SFO"})));

    app.on_run_completed(1, "Found 3 flights".to_string(), None);
    app.send(&mut host, "Cheapest?", Vec::new()).expect("send");
    assert!(app.live_trace().is_empty());
}

#[test]
fn refused_run_start_finalizes_placeholder_with_error() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    host.refuse_with = Some("Run already active for session".to_string());

    let error = app
        .send(&mut host, "Hello", Vec::new())
        .expect_err("host refused");

    assert!(matches!(error, ChatError::RunStart(_)));
    let reply = app
        .current_messages()
        .and_then(|log| log.last())
        .cloned()
        .expect("reply");
    assert_eq!(reply.text, "Error: Run already active for session");
    assert!(!reply.is_streaming);
    assert_eq!(app.current_run_state(), &RunState::Idle);
}

#[test]
fn history_sent_to_host_includes_prior_turns_and_knowledge() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    app.set_knowledge(vec!["doc-1".to_string(), "doc-7".to_string()]);
    app.send(&mut host, "one", Vec::new()).expect("send");
    app.on_run_completed(1, "first".to_string(), None);

    app.send(&mut host, "two", Vec::new()).expect("send");

    let start = host.last_start();
    let history: Vec<(RunRole, &str)> = start
        .messages
        .iter()
        .map(|m| (m.role, m.text.as_str()))
        .collect();
    assert_eq!(
        history,
        vec![
            (RunRole::User, "one"),
            (RunRole::Assistant, "first"),
            (RunRole::User, "two"),
        ]
    );
    assert_eq!(start.knowledge, vec!["doc-1".to_string(), "doc-7".to_string()]);
    assert_eq!(start.model_id, "gpt-4o");
    assert!(!start.instructions.is_empty());
}

#[test]
fn completion_bumps_last_modified() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    let session_id = app.send(&mut host, "Hello", Vec::new()).expect("send");
    let before = app.registry().get(&session_id).map(|s| s.last_modified);

    app.on_run_completed(1, "Hi".to_string(), None);

    assert!(app.registry().get(&session_id).map(|s| s.last_modified) > before);
}

#[test]
fn feedback_is_recorded_on_selected_session() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    app.send(&mut host, "Hello", Vec::new()).expect("send");
    app.on_run_completed(1, "Hi".to_string(), None);
    let reply_id = app
        .current_messages()
        .and_then(|log| log.last())
        .map(|m| m.id.clone())
        .expect("reply");

    app.set_feedback(&reply_id, Some(Feedback::Down)).expect("feedback");

    assert_eq!(
        app.current_messages()
            .and_then(|log| log.find(&reply_id))
            .and_then(|m| m.feedback),
        Some(Feedback::Down)
    );
    assert!(matches!(
        app.set_feedback("missing", None),
        Err(ChatError::UnknownMessage { .. })
    ));
}

#[test]
fn export_renders_transcript_with_agent_label() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    assert_eq!(app.export_current().expect("export"), None);

    app.send(&mut host, "Hello there", Vec::new()).expect("send");
    app.on_run_completed(1, "General Kenobi".to_string(), None);

    let export = app.export_current().expect("export").expect("non-empty");
    assert_eq!(export.file_name, "hello_there.md");
    assert!(export.markdown.starts_with("### You ("));
    assert!(export.markdown.contains("\n---\n\n### Orchestrator ("));
    assert!(export.markdown.ends_with("General Kenobi\n"));
}

#[test]
fn model_override_flows_into_run_and_resets_on_switch() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    app.set_model(" gpt-4o-mini ");
    assert_eq!(app.model(), "gpt-4o-mini");

    let general = app.send(&mut host, "Hello", Vec::new()).expect("send");
    assert_eq!(host.last_start().model_id, "gpt-4o-mini");
    app.on_run_completed(1, "Hi".to_string(), None);

    app.set_active_agent("writer").expect("writer");
    assert_eq!(app.model(), "gpt-4o");
    app.send(&mut host, "Draft a memo", Vec::new()).expect("send");
    assert_eq!(host.last_start().model_id, "gpt-4o");

    app.set_model("o3");
    app.select_session(&general).expect("select");
    assert_eq!(app.model(), "gpt-4o");
}

#[test]
fn blank_model_restores_agent_default() {
    let mut app = app();
    app.set_model("o3");

    app.set_model("  ");

    assert_eq!(app.model(), app.active_agent().model);
}

#[test]
fn title_takes_raw_leading_characters() {
    let mut app = app();
    let mut host = HostSpy::new(1);
    let text = format!("{} ", "a".repeat(30));

    app.send(&mut host, &text, Vec::new()).expect("send");

    let expected = format!("{}...", "a".repeat(30));
    assert_eq!(
        app.current_session().map(|s| s.title.as_str()),
        Some(expected.as_str())
    );
}

#[test]
fn export_uses_configured_user_label() {
    let mut app = app().with_user_label("Ada");
    let mut host = HostSpy::new(1);
    app.send(&mut host, "Hello", Vec::new()).expect("send");
    app.on_run_completed(1, "Hi".to_string(), None);

    let export = app.export_current().expect("export").expect("non-empty");

    assert_eq!(app.user_label(), "Ada");
    assert!(export.markdown.starts_with("### Ada ("));
}

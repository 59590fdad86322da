//! End-to-end session tests against an in-process synthesis backend.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use speechsync::protocol::{decode, encode, EventKind, Frame};
use speechsync::{ClientEvent, SentenceId, ServerStreamingAudioTextProcessor, SessionState, SpeechError, TtsConfig};

type BackendWs = WebSocketStream<TcpStream>;

// ── Mock backend ──────────────────────────────────────────────────

async fn spawn_backend<F, Fut, T>(script: F) -> (String, JoinHandle<T>)
where
    F: FnOnce(BackendWs) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await
    });
    (format!("ws://{addr}/api/v3/tts/bidirection"), handle)
}

async fn recv_frame(ws: &mut BackendWs) -> Option<Frame> {
    while let Some(message) = ws.next().await {
        match message.ok()? {
            Message::Binary(data) => return Some(decode(&data).unwrap()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

async fn expect_frame(ws: &mut BackendWs, kind: EventKind) -> Frame {
    let frame = recv_frame(ws).await.unwrap_or_else(|| panic!("stream ended waiting for {kind:?}"));
    assert_eq!(frame.event, kind);
    frame
}

async fn send(ws: &mut BackendWs, frame: Frame) {
    ws.send(Message::Binary(encode(&frame).into())).await.unwrap();
}

/// Connection and session handshake; returns the session id.
async fn accept_session(ws: &mut BackendWs) -> String {
    expect_frame(ws, EventKind::StartConnection).await;
    send(ws, Frame::control(EventKind::ConnectionStarted, Some("conn-1".into()), "{}")).await;
    let start = expect_frame(ws, EventKind::StartSession).await;
    let session_id = start.id.clone().unwrap();
    send(ws, Frame::control(EventKind::SessionStarted, Some(session_id.clone()), "{}")).await;
    session_id
}

/// Teardown after session-finished was sent.
async fn finish_connection(ws: &mut BackendWs, session_id: &str) {
    let finish = expect_frame(ws, EventKind::FinishSession).await;
    assert_eq!(finish.id.as_deref(), Some(session_id));
    expect_frame(ws, EventKind::FinishConnection).await;
    send(ws, Frame::control(EventKind::ConnectionFinished, None, "{}")).await;
}

fn config(endpoint: String) -> TtsConfig {
    TtsConfig {
        endpoint,
        app_id: "test-app".into(),
        access_token: "test-token".into(),
        speaker: "zh_female_test".into(),
        handshake_timeout_ms: 2_000,
        finish_timeout_ms: 2_000,
        ..TtsConfig::default()
    }
}

fn drain(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn text_stream(parts: &[&str]) -> futures_util::stream::Iter<std::vec::IntoIter<String>> {
    futures_util::stream::iter(parts.iter().map(|s| s.to_string()).collect::<Vec<_>>())
}

/// Frame kinds received until the client closes the socket; `None` if it never does.
async fn frames_until_close(ws: &mut BackendWs) -> Option<Vec<EventKind>> {
    let mut received = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(3), recv_frame(ws)).await {
            Ok(Some(frame)) => received.push(frame.event),
            Ok(None) => return Some(received),
            Err(_) => return None,
        }
    }
}

/// Collect client events until one of `kind` arrives, then cancel the turn.
async fn cancel_on(rx: &mut mpsc::Receiver<ClientEvent>, kind: &str, cancel: &CancellationToken) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        let hit = event.kind() == kind;
        seen.push(event);
        if hit {
            cancel.cancel();
            break;
        }
    }
    seen
}

// ── Scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn single_sentence_with_word_spans() {
    let (endpoint, backend) = spawn_backend(|mut ws| async move {
        let session_id = accept_session(&mut ws).await;
        let task = expect_frame(&mut ws, EventKind::TaskRequest).await;
        assert!(task.control_text().contains("你好。"));

        let sid = Some(session_id.clone());
        send(
            &mut ws,
            Frame::control(EventKind::SentenceStart, sid.clone(), r#"{"sentence_id":1,"text":"你好。"}"#),
        )
        .await;
        send(&mut ws, Frame::audio(sid.clone(), vec![0xAB; 100])).await;
        send(
            &mut ws,
            Frame::control(
                EventKind::SentenceEnd,
                sid.clone(),
                r#"{"words":[{"word":"你好","startTime":0,"endTime":0.6}],"text":"你好。"}"#,
            ),
        )
        .await;
        send(&mut ws, Frame::control(EventKind::SessionFinished, sid, "{}")).await;
        finish_connection(&mut ws, &session_id).await;
    })
    .await;

    let processor = ServerStreamingAudioTextProcessor::new(config(endpoint));
    let (tx, mut rx) = mpsc::channel(64);
    let summary = processor
        .process(text_stream(&["你好。"]), &tx, CancellationToken::new())
        .await
        .unwrap();
    backend.await.unwrap();

    assert_eq!(summary.full_text, "你好。");
    assert_eq!(summary.sentence_count, 1);
    assert_eq!(summary.audio_bytes, 100);
    assert_eq!(processor.session_state(), SessionState::Closed);

    let events = drain(&mut rx);
    let kinds: Vec<&str> = events.iter().map(ClientEvent::kind).collect();
    assert_eq!(
        kinds,
        vec!["text_chunk", "sentence_start", "audio_chunk", "sentence_complete", "chat_complete"]
    );

    match &events[3] {
        ClientEvent::SentenceComplete {
            sentence_id,
            timestamps,
            chunk_count,
            ..
        } => {
            assert_eq!(*sentence_id, SentenceId(1));
            assert_eq!(*chunk_count, 1);
            let spans: Vec<(&str, u64, u64)> = timestamps
                .iter()
                .map(|t| (t.char.as_str(), t.start_ms, t.end_ms))
                .collect();
            assert_eq!(spans, vec![("你", 0, 300), ("好", 300, 600), ("。", 600, 800)]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        events[4],
        ClientEvent::ChatComplete {
            full_text: "你好。".into(),
            sentence_count: 1
        }
    );

    let audio = processor.sentence_audio(SentenceId(1)).unwrap();
    assert_eq!(audio.bytes, vec![0xAB; 100]);
    assert_eq!(processor.completed_sentences().len(), 1);
}

#[tokio::test]
async fn finish_waits_for_session_finished() {
    let (endpoint, backend) = spawn_backend(|mut ws| async move {
        let session_id = accept_session(&mut ws).await;
        expect_frame(&mut ws, EventKind::TaskRequest).await;
        expect_frame(&mut ws, EventKind::TaskRequest).await;

        // Text stream is exhausted now; nothing may arrive before session-finished.
        let early = tokio::time::timeout(Duration::from_millis(300), recv_frame(&mut ws)).await;
        let sent_early = early.is_ok();

        send(&mut ws, Frame::control(EventKind::SessionFinished, Some(session_id.clone()), "{}")).await;
        finish_connection(&mut ws, &session_id).await;
        sent_early
    })
    .await;

    let processor = ServerStreamingAudioTextProcessor::new(config(endpoint));
    let (tx, mut rx) = mpsc::channel(64);
    let summary = processor
        .process(text_stream(&["Hello, ", "world."]), &tx, CancellationToken::new())
        .await
        .unwrap();

    assert!(!backend.await.unwrap(), "finish-session sent before session-finished");
    assert_eq!(summary.full_text, "Hello, world.");
    assert_eq!(summary.sentence_count, 0);

    let events = drain(&mut rx);
    let chunks: String = events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::TextChunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, "Hello, world.");
    assert!(matches!(events.last(), Some(ClientEvent::ChatComplete { sentence_count: 0, .. })));
}

#[tokio::test]
async fn handshake_timeout_fails_once_and_closes() {
    let (endpoint, backend) = spawn_backend(|mut ws| async move {
        expect_frame(&mut ws, EventKind::StartConnection).await;
        // Never acknowledge; report whether the client released the socket.
        tokio::time::timeout(Duration::from_secs(5), recv_frame(&mut ws))
            .await
            .map(|frame| frame.is_none())
            .unwrap_or(false)
    })
    .await;

    let mut cfg = config(endpoint);
    cfg.handshake_timeout_ms = 200;
    let processor = ServerStreamingAudioTextProcessor::new(cfg);
    let (tx, mut rx) = mpsc::channel(64);

    let err = processor
        .process(text_stream(&["你好。"]), &tx, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SpeechError::HandshakeTimeout(_)));
    assert_eq!(processor.session_state(), SessionState::Failed);
    assert!(backend.await.unwrap(), "socket was not closed");

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ClientEvent::Error { code, .. } if code == "HANDSHAKE_TIMEOUT"));
}

#[tokio::test]
async fn backend_failure_discards_partial_sentence() {
    let (endpoint, backend) = spawn_backend(|mut ws| async move {
        let session_id = accept_session(&mut ws).await;
        expect_frame(&mut ws, EventKind::TaskRequest).await;

        let sid = Some(session_id);
        send(&mut ws, Frame::control(EventKind::SentenceStart, sid.clone(), r#"{"text":"半句"}"#).with_sequence(7)).await;
        send(&mut ws, Frame::audio(sid.clone(), vec![1, 2, 3])).await;
        send(
            &mut ws,
            Frame::control(EventKind::SessionFailed, sid, r#"{"status_code":45000000,"message":"quota exceeded"}"#),
        )
        .await;
        // Best-effort cancel-session from the client, then the socket goes away.
        let mut received = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(2), recv_frame(&mut ws)).await {
            received.push(frame.event);
        }
        received
    })
    .await;

    let processor = ServerStreamingAudioTextProcessor::new(config(endpoint));
    let (tx, mut rx) = mpsc::channel(64);
    let err = processor
        .process(
            text_stream(&["半句"]).chain(futures_util::stream::pending()),
            &tx,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SpeechError::SessionAborted(ref m) if m.contains("quota exceeded")));
    assert_eq!(processor.session_state(), SessionState::Failed);
    assert!(processor.completed_sentences().is_empty());

    let received = backend.await.unwrap();
    assert!(!received.contains(&EventKind::FinishSession));

    let events = drain(&mut rx);
    assert_eq!(events.iter().filter(|e| e.kind() == "error").count(), 1);
    assert!(!events.iter().any(|e| e.kind() == "sentence_complete"));
    assert!(events.iter().any(|e| matches!(e, ClientEvent::SentenceStart { sentence_id, .. } if *sentence_id == SentenceId(7))));
}

#[tokio::test]
async fn cancel_mid_sentence_discards_partial() {
    let (endpoint, backend) = spawn_backend(|mut ws| async move {
        let session_id = accept_session(&mut ws).await;
        expect_frame(&mut ws, EventKind::TaskRequest).await;

        let sid = Some(session_id);
        send(&mut ws, Frame::control(EventKind::SentenceStart, sid.clone(), r#"{"text":"说到一半"}"#).with_sequence(3)).await;
        send(&mut ws, Frame::audio(sid, vec![9; 32])).await;
        frames_until_close(&mut ws).await
    })
    .await;

    let processor = ServerStreamingAudioTextProcessor::new(config(endpoint));
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let (result, mut events) = tokio::time::timeout(
        Duration::from_secs(5),
        async {
            tokio::join!(
                processor.process(
                    text_stream(&["说到一半"]).chain(futures_util::stream::pending()),
                    &tx,
                    cancel.clone(),
                ),
                cancel_on(&mut rx, "audio_chunk", &cancel),
            )
        },
    )
    .await
    .expect("cancelled turn did not return");
    events.extend(drain(&mut rx));

    let err = result.unwrap_err();
    assert!(matches!(err, SpeechError::SessionAborted(ref m) if m.contains("cancelled")));
    assert_eq!(processor.session_state(), SessionState::Failed);
    assert!(processor.completed_sentences().is_empty());
    assert!(processor.sentence_audio(SentenceId(3)).is_none());

    let kinds: Vec<&str> = events.iter().map(ClientEvent::kind).collect();
    assert_eq!(kinds, vec!["text_chunk", "sentence_start", "audio_chunk", "error"]);

    let received = backend.await.unwrap().expect("socket was not closed");
    assert!(received.contains(&EventKind::CancelSession));
    assert!(!received.contains(&EventKind::FinishSession));
}

#[tokio::test]
async fn cancel_during_teardown_fails_turn() {
    let (endpoint, backend) = spawn_backend(|mut ws| async move {
        let session_id = accept_session(&mut ws).await;
        expect_frame(&mut ws, EventKind::TaskRequest).await;
        send(&mut ws, Frame::control(EventKind::SessionFinished, Some(session_id), "{}")).await;
        // Never acknowledge finish-connection.
        frames_until_close(&mut ws).await
    })
    .await;

    let mut cfg = config(endpoint);
    cfg.finish_timeout_ms = 30_000;
    let processor = ServerStreamingAudioTextProcessor::new(cfg);
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let (result, mut events) = tokio::time::timeout(
        Duration::from_secs(5),
        async {
            tokio::join!(
                processor.process(text_stream(&["你好。"]), &tx, cancel.clone()),
                cancel_on(&mut rx, "chat_complete", &cancel),
            )
        },
    )
    .await
    .expect("teardown ignored cancellation");
    events.extend(drain(&mut rx));

    let err = result.unwrap_err();
    assert!(matches!(err, SpeechError::SessionAborted(ref m) if m.contains("cancelled")));
    assert_eq!(processor.session_state(), SessionState::Failed);

    let kinds: Vec<&str> = events.iter().map(ClientEvent::kind).collect();
    assert_eq!(kinds, vec!["text_chunk", "chat_complete", "error"]);

    assert!(backend.await.unwrap().is_some(), "socket was not closed");
}

#[tokio::test]
async fn socket_loss_after_session_finished_fails_turn() {
    let (endpoint, backend) = spawn_backend(|mut ws| async move {
        let session_id = accept_session(&mut ws).await;
        expect_frame(&mut ws, EventKind::TaskRequest).await;
        send(&mut ws, Frame::control(EventKind::SessionFinished, Some(session_id), "{}")).await;
        // Drop the socket without a close handshake.
    })
    .await;

    let processor = ServerStreamingAudioTextProcessor::new(config(endpoint));
    let (tx, mut rx) = mpsc::channel(64);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        processor.process(
            text_stream(&["你好。"]).chain(futures_util::stream::pending()),
            &tx,
            CancellationToken::new(),
        ),
    )
    .await
    .expect("turn hung after the backend went away");
    backend.await.unwrap();

    assert!(matches!(result, Err(SpeechError::SessionAborted(_))));
    assert_eq!(processor.session_state(), SessionState::Failed);

    let events = drain(&mut rx);
    assert_eq!(events.iter().filter(|e| e.kind() == "error").count(), 1);
    assert!(!events.iter().any(|e| e.kind() == "chat_complete"));
}

use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared::domain::{EvidenceProvider, InputKind};
use shared::protocol::InterruptRequestData;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::{net::TcpListener, sync::mpsc};

fn sample_case() -> CaseInfo {
    CaseInfo {
        summary: "程某某饮酒后驾驶电动车载人发生事故，乘员经抢救无效死亡。".into(),
        prosecutor_title: "江山市北湖区人民检察院".into(),
        prosecutor_name: "王某".into(),
        statement_charge: "被告人程某某涉嫌过失致人死亡罪，依法提起公诉。".into(),
        crime: "过失致人死亡罪".into(),
        defendant_name: "程某某".into(),
        defendant_former_name: None,
        defendant_birthdate: "1989-09-23".into(),
        defendant_birthplace: "海宁省武鸣市".into(),
        defendant_ethnicity: "汉族".into(),
        defendant_education: "初中".into(),
        defendant_occupation: "工人".into(),
        defendant_employer: "华盛电子厂".into(),
        defendant_residence: "江山市北湖区小石镇".into(),
        defendant_id_number: "456878198909236532".into(),
        defendant_legal_record: "无".into(),
        detention_date: "2016-03-25".into(),
        indictment_date: "2016-04-06".into(),
        attorney_name: "李某".into(),
        court_name: "江山市北湖区人民法院".into(),
        judge_name: "赵某".into(),
        judge_name_2: "钱某".into(),
        clerk_name: "孙某".into(),
        case_id: "江公北诉字[2016]03449号".into(),
    }
}

fn sample_evidence() -> Vec<EvidenceItem> {
    vec![EvidenceItem {
        id: "E001".into(),
        name: "现场勘验笔录".into(),
        content: "现场位于小潭高中附近斜坡路口。".into(),
        provider: EvidenceProvider::Prosecutor,
    }]
}

fn interrupt(node: &str, input_type: InputKind, prompt: &str) -> InterruptRequestData {
    InterruptRequestData {
        node_name: node.into(),
        input_type,
        prompt: prompt.into(),
        options: None,
        metadata: None,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event stream closed")
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut matches: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if matches(&event) {
            return event;
        }
    }
}

struct RecordingChannel {
    fail_connect: bool,
    fail_send: AtomicBool,
    connected: Mutex<bool>,
    sent: Mutex<Vec<ClientRequest>>,
}

impl RecordingChannel {
    fn new() -> Self {
        Self {
            fail_connect: false,
            fail_send: AtomicBool::new(false),
            connected: Mutex::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl TrialChannel for RecordingChannel {
    async fn connect(&self, sink: Arc<dyn ChannelSink>) -> Result<()> {
        if self.fail_connect {
            return Err(anyhow!("connection refused"));
        }
        *self.connected.lock().await = true;
        sink.on_open().await;
        Ok(())
    }

    async fn send(&self, request: &ClientRequest) -> Result<()> {
        if !*self.connected.lock().await {
            return Err(anyhow!("not connected"));
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(anyhow!("send failed"));
        }
        self.sent.lock().await.push(request.clone());
        Ok(())
    }

    async fn disconnect(&self) {
        *self.connected.lock().await = false;
    }

    async fn is_connected(&self) -> bool {
        *self.connected.lock().await
    }
}

#[tokio::test]
async fn connect_dispatches_start_trial_and_rejects_a_second_connect() {
    let channel = Arc::new(RecordingChannel::new());
    let client = TrialClient::new(Arc::clone(&channel) as Arc<dyn TrialChannel>);

    client
        .connect(sample_case(), sample_evidence())
        .await
        .expect("connect");

    {
        let sent = channel.sent.lock().await;
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            ClientRequest::StartTrial { data } => {
                assert_eq!(data.case_info.case_id, "江公北诉字[2016]03449号");
                assert_eq!(data.evidence_list.len(), 1);
            }
            other => panic!("expected start_trial, got {other:?}"),
        }
    }

    let err = client
        .connect(sample_case(), sample_evidence())
        .await
        .expect_err("second connect must be refused");
    assert!(matches!(err, TrialClientError::AlreadyConnected));
}

#[tokio::test]
async fn connect_failure_leaves_the_client_disconnected() {
    let channel = Arc::new(RecordingChannel::failing_connect());
    let client = TrialClient::new(channel as Arc<dyn TrialChannel>);

    let err = client
        .connect(sample_case(), sample_evidence())
        .await
        .expect_err("connect must fail");
    assert!(matches!(err, TrialClientError::Connect(_)));

    let state = client.snapshot().await;
    assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    assert_eq!(state.active_role, shared::domain::ActiveRole::Standby);
}

#[tokio::test]
async fn responding_sends_user_input_bound_to_the_session_thread() {
    let channel = Arc::new(RecordingChannel::new());
    let client = TrialClient::new(Arc::clone(&channel) as Arc<dyn TrialChannel>);
    client
        .connect(sample_case(), sample_evidence())
        .await
        .expect("connect");

    client
        .on_event(ServerEvent::SessionCreated(
            shared::protocol::SessionCreatedData {
                thread_id: "abc123".into(),
                message: None,
            },
        ))
        .await;
    client
        .on_event(ServerEvent::InterruptRequest(interrupt(
            "defense_question",
            InputKind::Text,
            "请提问",
        )))
        .await;
    assert!(client.snapshot().await.is_awaiting_input());

    client
        .respond(UserInput::Text("被告人当时是否清醒？".into()))
        .await;

    let sent = channel.sent.lock().await;
    match sent.last().expect("user_input sent") {
        ClientRequest::UserInput { thread_id, data } => {
            assert_eq!(thread_id, "abc123");
            assert_eq!(data.interrupt_node, "defense_question");
            assert_eq!(data.input, UserInput::Text("被告人当时是否清醒？".into()));
        }
        other => panic!("expected user_input, got {other:?}"),
    }
    drop(sent);

    let state = client.snapshot().await;
    assert!(!state.is_awaiting_input());
    assert_eq!(
        state.transcript.last().expect("optimistic entry").content,
        "被告人当时是否清醒？"
    );
}

#[tokio::test]
async fn a_failed_send_leaves_the_interrupt_pending() {
    let channel = Arc::new(RecordingChannel::new());
    let client = TrialClient::new(Arc::clone(&channel) as Arc<dyn TrialChannel>);
    client
        .connect(sample_case(), sample_evidence())
        .await
        .expect("connect");
    client
        .on_event(ServerEvent::SessionCreated(
            shared::protocol::SessionCreatedData {
                thread_id: "abc123".into(),
                message: None,
            },
        ))
        .await;
    client
        .on_event(ServerEvent::InterruptRequest(interrupt(
            "defense_question",
            InputKind::Text,
            "请提问",
        )))
        .await;

    channel.fail_send.store(true, Ordering::SeqCst);
    let before = client.snapshot().await.transcript.len();
    client.respond(UserInput::Text("有异议。".into())).await;

    let state = client.snapshot().await;
    assert!(state.is_awaiting_input(), "the interrupt survives a send failure");
    assert_eq!(state.transcript.len(), before, "no optimistic entry on failure");
}

#[tokio::test]
async fn respond_without_a_pending_interrupt_sends_nothing() {
    let channel = Arc::new(RecordingChannel::new());
    let client = TrialClient::new(Arc::clone(&channel) as Arc<dyn TrialChannel>);
    client
        .connect(sample_case(), sample_evidence())
        .await
        .expect("connect");

    client.respond(UserInput::Decision(true)).await;
    let sent = channel.sent.lock().await;
    assert_eq!(sent.len(), 1, "only start_trial went out");
}

// ---------------------------------------------------------------------------
// WebSocket transport against a scripted axum backend.
// ---------------------------------------------------------------------------

enum Frame {
    Text(String),
    Close,
}

#[derive(Clone)]
struct BackendState {
    inbound: mpsc::Sender<Value>,
    outbound: Arc<Mutex<Option<mpsc::Receiver<Frame>>>>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BackendState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| drive_socket(socket, state))
}

async fn drive_socket(socket: WebSocket, state: BackendState) {
    let (mut writer, mut reader) = socket.split();
    if let Some(mut outbound) = state.outbound.lock().await.take() {
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let result = match frame {
                    Frame::Text(text) => writer.send(WsMessage::Text(text)).await,
                    Frame::Close => {
                        let _ = writer.send(WsMessage::Close(None)).await;
                        break;
                    }
                };
                if result.is_err() {
                    break;
                }
            }
        });
    }
    while let Some(Ok(frame)) = reader.next().await {
        if let WsMessage::Text(text) = frame {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                let _ = state.inbound.send(value).await;
            }
        }
    }
}

async fn spawn_backend() -> Result<(String, mpsc::Receiver<Value>, mpsc::Sender<Frame>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let state = BackendState {
        inbound: inbound_tx,
        outbound: Arc::new(Mutex::new(Some(outbound_rx))),
    };
    let app = Router::new()
        .route("/ws/trial", get(ws_handler))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), inbound_rx, outbound_tx))
}

async fn recv_inbound(rx: &mut mpsc::Receiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a client frame")
        .expect("backend channel closed")
}

#[tokio::test]
async fn trial_round_trip_suppresses_the_echoed_answer() {
    let (url, mut inbound, outbound) = spawn_backend().await.expect("backend");
    let channel = Arc::new(WsTrialChannel::new(&url).expect("ws url"));
    let client = TrialClient::new(channel as Arc<dyn TrialChannel>);
    let mut events = client.subscribe_events();

    client
        .connect(sample_case(), sample_evidence())
        .await
        .expect("connect");

    let start = recv_inbound(&mut inbound).await;
    assert_eq!(start["type"], "start_trial");
    assert_eq!(start["data"]["case_info"]["attorney_name"], "李某");
    assert!(start["data"]["case_info"]["abstract"].is_string());
    assert_eq!(start["data"]["evidence_list"][0]["provider"], "prosecutor");

    outbound
        .send(Frame::Text(
            json!({"type": "session_created", "data": {"thread_id": "abc123"}}).to_string(),
        ))
        .await
        .expect("send");
    wait_for(&mut events, |event| matches!(event, SessionEvent::Connected { .. })).await;

    let state = client.snapshot().await;
    assert_eq!(state.session_id.as_deref(), Some("abc123"));
    assert_eq!(state.connection_status, ConnectionStatus::Connected);

    outbound
        .send(Frame::Text(
            json!({
                "type": "interrupt_request",
                "data": {
                    "node_name": "defense_question",
                    "input_type": "string",
                    "prompt": "请提问"
                }
            })
            .to_string(),
        ))
        .await
        .expect("send");
    wait_for(&mut events, |event| matches!(event, SessionEvent::AwaitingInput(_))).await;
    assert!(client.snapshot().await.is_awaiting_input());

    client
        .respond(UserInput::Text("被告人当时是否清醒？".into()))
        .await;
    let user_input = recv_inbound(&mut inbound).await;
    assert_eq!(user_input["type"], "user_input");
    assert_eq!(user_input["thread_id"], "abc123");
    assert_eq!(user_input["data"]["interrupt_node"], "defense_question");
    assert_eq!(user_input["data"]["input"], "被告人当时是否清醒？");

    let state = client.snapshot().await;
    assert!(!state.is_awaiting_input());
    let transcript_len = state.transcript.len();

    outbound
        .send(Frame::Text(
            json!({
                "type": "node_executed",
                "data": {
                    "node_name": "defense_question",
                    "progress": 42.5,
                    "messages": [
                        {"content": "被告人当时是否清醒？", "name": "用户 (李某）"}
                    ]
                }
            })
            .to_string(),
        ))
        .await
        .expect("send");
    wait_for(
        &mut events,
        |event| matches!(event, SessionEvent::ProgressChanged { progress, .. } if *progress == 42.5),
    )
    .await;

    let state = client.snapshot().await;
    assert_eq!(state.progress_percent, 42.5);
    assert_eq!(state.transcript.len(), transcript_len, "echo must be suppressed");
}

#[tokio::test]
async fn unrecognized_frames_are_dropped_without_breaking_the_stream() {
    let (url, mut inbound, outbound) = spawn_backend().await.expect("backend");
    let channel = Arc::new(WsTrialChannel::new(&url).expect("ws url"));
    let client = TrialClient::new(channel as Arc<dyn TrialChannel>);
    let mut events = client.subscribe_events();

    client
        .connect(sample_case(), sample_evidence())
        .await
        .expect("connect");
    let _ = recv_inbound(&mut inbound).await;

    outbound
        .send(Frame::Text("not json at all".into()))
        .await
        .expect("send");
    outbound
        .send(Frame::Text(json!({"type": "mystery", "data": {}}).to_string()))
        .await
        .expect("send");
    // node_executed without its required progress field.
    outbound
        .send(Frame::Text(
            json!({"type": "node_executed", "data": {"node_name": "judge_open"}}).to_string(),
        ))
        .await
        .expect("send");
    outbound
        .send(Frame::Text(
            json!({"type": "session_created", "data": {"thread_id": "alive"}}).to_string(),
        ))
        .await
        .expect("send");

    let event = wait_for(&mut events, |event| {
        matches!(event, SessionEvent::Connected { .. })
    })
    .await;
    match event {
        SessionEvent::Connected { thread_id } => assert_eq!(thread_id, "alive"),
        other => panic!("unexpected event: {other:?}"),
    }
    let state = client.snapshot().await;
    assert_eq!(state.progress_percent, 0.0, "malformed node_executed was dropped");
}

#[tokio::test]
async fn a_backend_close_marks_the_client_disconnected() {
    let (url, mut inbound, outbound) = spawn_backend().await.expect("backend");
    let channel = Arc::new(WsTrialChannel::new(&url).expect("ws url"));
    let client = TrialClient::new(channel as Arc<dyn TrialChannel>);
    let mut events = client.subscribe_events();

    client
        .connect(sample_case(), sample_evidence())
        .await
        .expect("connect");
    let _ = recv_inbound(&mut inbound).await;

    outbound
        .send(Frame::Text(
            json!({"type": "session_created", "data": {"thread_id": "abc123"}}).to_string(),
        ))
        .await
        .expect("send");
    wait_for(&mut events, |event| matches!(event, SessionEvent::Connected { .. })).await;

    outbound.send(Frame::Close).await.expect("close");
    wait_for(&mut events, |event| matches!(event, SessionEvent::Disconnected)).await;

    let state = client.snapshot().await;
    assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    assert_eq!(state.active_role, shared::domain::ActiveRole::Standby);
    assert_eq!(state.thread_id, None);
}

#[tokio::test]
async fn sending_while_disconnected_fails_loudly() {
    let channel = WsTrialChannel::new("http://127.0.0.1:9").expect("ws url");
    let err = channel
        .send(&ClientRequest::Ping)
        .await
        .expect_err("send must fail while disconnected");
    assert!(err.to_string().contains("not connected"));
}

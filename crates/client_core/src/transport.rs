//! WebSocket transport for the trial backend: one persistent connection,
//! push-based delivery of validated events, periodic keepalive pings.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use shared::{
    error::BackendError,
    protocol::{ClientRequest, ServerEvent},
};
use tokio::{net::TcpStream, sync::Mutex, task::JoinHandle, time};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{ChannelSink, TrialChannel};

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

fn encode(request: &ClientRequest) -> Result<String> {
    serde_json::to_string(request).context("failed to encode outbound request")
}

/// Derives the trial endpoint from an http(s) or ws(s) base URL.
fn trial_ws_url(base_url: &str) -> Result<String> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base_url.starts_with("ws://") || base_url.starts_with("wss://") {
        base_url.to_string()
    } else {
        format!("ws://{base_url}")
    };
    let ws_url = format!("{}/ws/trial", ws_base.trim_end_matches('/'));
    url::Url::parse(&ws_url).with_context(|| format!("invalid backend url: {base_url}"))?;
    Ok(ws_url)
}

pub struct WsTrialChannel {
    ws_url: String,
    writer: Arc<Mutex<Option<WsWriter>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WsTrialChannel {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            ws_url: trial_ws_url(base_url)?,
            writer: Arc::new(Mutex::new(None)),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TrialChannel for WsTrialChannel {
    async fn connect(&self, sink: Arc<dyn ChannelSink>) -> Result<()> {
        {
            let mut tasks = self.tasks.lock().await;
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if self.writer.lock().await.is_some() {
            return Err(anyhow!("trial channel already connected"));
        }

        let (stream, _) = connect_async(&self.ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {}", self.ws_url))?;
        let (ws_writer, mut ws_reader) = stream.split();
        *self.writer.lock().await = Some(ws_writer);
        sink.on_open().await;

        let writer = Arc::clone(&self.writer);
        let reader_sink = Arc::clone(&sink);
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => reader_sink.on_event(event).await,
                        Err(err) => {
                            warn!("dropping unrecognized inbound frame: {err}");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let event = ServerEvent::Error(BackendError::transport(format!(
                            "websocket receive failed: {err}"
                        )));
                        reader_sink.on_event(event).await;
                        break;
                    }
                }
            }
            writer.lock().await.take();
            reader_sink.on_close().await;
        });

        let writer = Arc::clone(&self.writer);
        let keepalive_task = tokio::spawn(async move {
            let mut ticker = time::interval(KEEPALIVE_INTERVAL);
            // The first tick fires immediately; the connection is fresh.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Ok(text) = encode(&ClientRequest::Ping) else {
                    break;
                };
                let mut guard = writer.lock().await;
                let Some(ws) = guard.as_mut() else {
                    break;
                };
                if ws.send(Message::Text(text)).await.is_err() {
                    debug!("keepalive ping failed; stopping");
                    break;
                }
            }
        });

        *self.tasks.lock().await = vec![reader_task, keepalive_task];
        Ok(())
    }

    async fn send(&self, request: &ClientRequest) -> Result<()> {
        let text = encode(request)?;
        let mut guard = self.writer.lock().await;
        let ws = guard
            .as_mut()
            .ok_or_else(|| anyhow!("trial channel is not connected"))?;
        ws.send(Message::Text(text))
            .await
            .context("failed to send over trial channel")
    }

    async fn disconnect(&self) {
        if let Some(mut ws) = self.writer.lock().await.take() {
            let _ = ws.send(Message::Close(None)).await;
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}

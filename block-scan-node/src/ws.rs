//! Websocket log subscriptions for EVM nodes.
//!
//! [`EvmDialer`] opens one websocket per engine run; the resulting
//! [`WsLogClient`] answers historical queries over HTTP through [`EvmRpc`] and
//! streams `eth_subscribe("logs")` notifications from the socket.
use crate::rpc::{filter_params, EvmRpc, RpcLog};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use block_scan::{
    chain::{LogClient, LogDialer, LogStream},
    types::{BlockHeader, LogFilter, RawLog},
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{net::TcpStream, sync::mpsc, sync::Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_ID: u64 = 1;
const STREAM_CAPACITY: usize = 256;

/// Extracts the log carried by an `eth_subscription` notification.
///
/// Other messages, logs removed by a reorg and pending logs yield `None`.
pub fn parse_notification(text: &str) -> Result<Option<RawLog>> {
    let parsed: Value = serde_json::from_str(text).context("Malformed websocket message")?;
    if parsed.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Ok(None);
    }
    let Some(result) = parsed.pointer("/params/result") else {
        return Ok(None);
    };
    let log: RpcLog = serde_json::from_value(result.clone()).context("Malformed log notification")?;
    if log.removed {
        return Ok(None);
    }
    Ok(log.into_raw()?)
}

pub struct EvmDialer {
    rpc: Arc<EvmRpc>,
}

impl EvmDialer {
    pub fn new(rpc: Arc<EvmRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl LogDialer for EvmDialer {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn LogClient>> {
        let (socket, response) = connect_async(endpoint)
            .await
            .with_context(|| format!("WebSocket connect to {endpoint}"))?;
        tracing::debug!(chain = %self.rpc.chain(), status = ?response.status(), "WebSocket connection established");
        Ok(Arc::new(WsLogClient {
            rpc: self.rpc.clone(),
            socket: Mutex::new(Some(socket)),
        }))
    }
}

/// A dialed log source. The socket carries a single subscription.
pub struct WsLogClient {
    rpc: Arc<EvmRpc>,
    socket: Mutex<Option<Socket>>,
}

#[async_trait]
impl LogClient for WsLogClient {
    async fn block_number(&self) -> Result<u64> {
        self.rpc.get_block_number().await
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        self.rpc.get_logs(filter).await
    }

    async fn block_by_number(&self, number: u64) -> Result<BlockHeader> {
        let header = self
            .rpc
            .get_header(number)
            .await?
            .with_context(|| format!("block {number} not found"))?;
        Ok(header.to_header()?)
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream> {
        let socket = self
            .socket
            .lock()
            .await
            .take()
            .context("websocket already carries a subscription")?;
        let (mut write, mut read) = socket.split();

        let mut params = filter_params(filter);
        if let Some(object) = params.as_object_mut() {
            object.remove("fromBlock");
            object.remove("toBlock");
        }
        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_ID,
            "method": "eth_subscribe",
            "params": ["logs", params],
        });
        write
            .send(Message::Text(request.to_string()))
            .await
            .context("WebSocket send")?;

        let subscription = loop {
            let Some(msg) = read.next().await else {
                bail!("websocket closed before the subscription was confirmed");
            };
            let Message::Text(text) = msg.context("WebSocket read")? else {
                continue;
            };
            let parsed: Value = serde_json::from_str(&text).context("Malformed websocket message")?;
            if parsed.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_ID) {
                continue;
            }
            if let Some(error) = parsed.get("error") {
                bail!("eth_subscribe rejected: {}", error);
            }
            break parsed
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
        };
        tracing::info!(chain = %self.rpc.chain(), subscription = %subscription, "Subscribed to logs");

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let from_block = filter.from_block;
        let chain = self.rpc.chain().to_string();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = tx.closed() => break,
                    msg = read.next() => msg,
                };
                let item = match msg {
                    Some(Ok(Message::Text(text))) => match parse_notification(&text) {
                        Ok(Some(log)) if log.block_number >= from_block => Ok(log),
                        Ok(_) => continue,
                        Err(e) => Err(e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            tracing::debug!(chain = %chain, "Failed to answer ping: {}", e);
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => Err(anyhow!("websocket closed: {:?}", frame)),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => Err(anyhow!(e).context("WebSocket read")),
                    None => break,
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
            tracing::debug!(chain = %chain, "Log subscription reader stopped");
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

//! TCP 命令前端：按行分帧的 JSON 命令面与测量推送。
//!
//! 请求：
//!   `{"cmd":"sub","specs":[{"object":…,"attribute":…,"unit":…}]}`
//!   `{"cmd":"set","points":[{"object":…,"attribute":…,"unit":…,"value":…}]}`
//!   `{"cmd":"qry","specs":[…]}`
//! 应答：
//!   set/sub 本地递交后立即 `{"reply":"ok"}`；
//!   qry 无同步应答，事后按捕获身份回送 `{"answer":{…}}`；
//!   订阅的测量值广播为 `{"measurement":{…}}`。

use crate::ports::{ConnectionReplyPort, ReplyLine};
use domain::{AttributeSpec, CorrelationId, Measurement, SetPoint};
use grid_device::{DeviceError, DeviceProxy};
use grid_telemetry::new_request_ids;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{error, info, warn, Instrument};

#[derive(Debug, Deserialize)]
struct SpecDto {
    object: String,
    attribute: String,
    #[serde(default)]
    unit: String,
}

impl SpecDto {
    fn into_spec(self) -> AttributeSpec {
        AttributeSpec::new(self.object, self.attribute, self.unit)
    }
}

#[derive(Debug, Deserialize)]
struct PointDto {
    object: String,
    attribute: String,
    #[serde(default)]
    unit: String,
    value: String,
}

impl PointDto {
    fn into_point(self) -> SetPoint {
        SetPoint {
            spec: AttributeSpec::new(self.object, self.attribute, self.unit),
            value: self.value,
        }
    }
}

/// 命令帧：闭合标签变体，`cmd` 字段为标签。
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
enum CommandFrame {
    Sub { specs: Vec<SpecDto> },
    Set { points: Vec<PointDto> },
    Qry { specs: Vec<SpecDto> },
}

/// 接受循环：每个连接一个任务。
pub async fn serve(
    listener: TcpListener,
    proxy: Arc<Mutex<DeviceProxy>>,
    reply_port: ConnectionReplyPort,
    measurements: broadcast::Sender<Measurement>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(target: "grid.bridge", peer = %peer, "command_connection");
                let proxy = Arc::clone(&proxy);
                let reply_port = reply_port.clone();
                let push_rx = measurements.subscribe();
                tokio::spawn(async move {
                    let ids = new_request_ids();
                    let span = tracing::info_span!(
                        "command_conn",
                        request_id = %ids.request_id,
                        peer = %peer
                    );
                    if let Err(e) = handle_connection(stream, proxy, reply_port, push_rx)
                        .instrument(span)
                        .await
                    {
                        warn!(target: "grid.bridge", peer = %peer, error = %e, "connection_error");
                    }
                });
            }
            Err(e) => {
                error!(target: "grid.bridge", error = %e, "accept_failed");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    proxy: Arc<Mutex<DeviceProxy>>,
    reply_port: ConnectionReplyPort,
    mut push_rx: broadcast::Receiver<Measurement>,
) -> Result<(), std::io::Error> {
    let (read_half, write_half) = stream.into_split();
    let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_loop(write_half, line_rx));

    // 推送面：订阅的测量值进本连接的出站线路
    let push_tx = line_tx.clone();
    let pusher = tokio::spawn(async move {
        loop {
            match push_rx.recv().await {
                Ok(m) => {
                    let line = serde_json::json!({
                        "measurement": {
                            "object": m.object,
                            "attribute": m.attribute,
                            "value": m.value,
                            "tsMs": m.ts_ms,
                        }
                    })
                    .to_string();
                    if push_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "grid.bridge", skipped, "slow_consumer_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // 本连接捕获过的身份，断开时撤销
    let mut captured: Vec<CorrelationId> = Vec::new();
    let mut lines = BufReader::new(read_half).lines();
    let outcome = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<CommandFrame>(line) {
                    Ok(frame) => {
                        dispatch_command(frame, &proxy, &reply_port, &line_tx, &mut captured)
                            .await;
                    }
                    Err(e) => {
                        warn!(target: "grid.bridge", error = %e, data = %line, "malformed_command");
                        send_error(&line_tx, &format!("malformed command: {e}"));
                    }
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    // 读侧结束（正常或出错）都走同一条收尾路径
    for id in captured {
        reply_port.forget(id);
    }
    pusher.abort();
    drop(line_tx);
    let _ = writer.await;
    outcome
}

async fn dispatch_command(
    frame: CommandFrame,
    proxy: &Arc<Mutex<DeviceProxy>>,
    reply_port: &ConnectionReplyPort,
    line_tx: &ReplyLine,
    captured: &mut Vec<CorrelationId>,
) {
    match frame {
        CommandFrame::Sub { specs } => {
            let specs = specs.into_iter().map(SpecDto::into_spec).collect();
            let outcome = proxy.lock().await.handle_subscribe(specs).await;
            answer_handoff(line_tx, outcome);
        }
        CommandFrame::Set { points } => {
            let points = points.into_iter().map(PointDto::into_point).collect();
            let outcome = proxy.lock().await.handle_set(points).await;
            answer_handoff(line_tx, outcome);
        }
        CommandFrame::Qry { specs } => {
            // 捕获请求方身份；应答由解复用循环事后路由回本连接
            let id = CorrelationId::capture();
            reply_port.register(id, line_tx.clone());
            let specs = specs.into_iter().map(SpecDto::into_spec).collect();
            match proxy.lock().await.handle_query(id, specs).await {
                Ok(()) => captured.push(id),
                Err(e) => {
                    reply_port.forget(id);
                    send_error(line_tx, &e.to_string());
                }
            }
        }
    }
}

/// set/sub 的确认只表示本地递交成功，不保证远端已完成。
fn answer_handoff(line_tx: &ReplyLine, outcome: Result<(), DeviceError>) {
    match outcome {
        Ok(()) => {
            let _ = line_tx.send(r#"{"reply":"ok"}"#.to_string());
        }
        Err(e) => send_error(line_tx, &e.to_string()),
    }
}

fn send_error(line_tx: &ReplyLine, message: &str) {
    let line = serde_json::json!({ "reply": "error", "message": message }).to_string();
    let _ = line_tx.send(line);
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut line_rx: mpsc::UnboundedReceiver<String>) {
    while let Some(mut line) = line_rx.recv().await {
        line.push('\n');
        if write_half.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frames_parse_by_tag() {
        let sub: CommandFrame = serde_json::from_str(
            r#"{"cmd":"sub","specs":[{"object":"genA","attribute":"voltage","unit":"V"}]}"#,
        )
        .expect("sub");
        assert!(matches!(sub, CommandFrame::Sub { specs } if specs.len() == 1));

        let set: CommandFrame = serde_json::from_str(
            r#"{"cmd":"set","points":[{"object":"genA","attribute":"voltage","value":"240.0"}]}"#,
        )
        .expect("set");
        match set {
            CommandFrame::Set { points } => {
                let point = points.into_iter().next().expect("point").into_point();
                assert_eq!(point.spec.object, "genA");
                assert_eq!(point.value, "240.0");
                // unit 缺省为空串
                assert_eq!(point.spec.unit, "");
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let qry: CommandFrame =
            serde_json::from_str(r#"{"cmd":"qry","specs":[{"object":"sw1","attribute":"status"}]}"#)
                .expect("qry");
        assert!(matches!(qry, CommandFrame::Qry { .. }));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(serde_json::from_str::<CommandFrame>(r#"{"cmd":"pub","specs":[]}"#).is_err());
    }
}

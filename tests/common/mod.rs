//! In-process test servers speaking the envelope protocol.
//!
//! Commands understood by the fake clinic server:
//! - `{"cmd": "echo", ...}` → replies with the object minus `cmd`
//! - `["echo", x]` → replies `x`
//! - `["fail"]` → replies with the `"error"` sentinel
//! - `["slow", ms, x]` → replies `x` after `ms` milliseconds
//! - `["ignore"]` → never replies
//! - `["hangup"]` → closes the connection

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::Framed;
use vetclix_client::rpc::codec::{FrameCodec, InboundFrame};

pub enum Reply {
    Send(String),
    Silent,
    HangUp,
}

/// Decide how to answer one inbound frame.
pub async fn respond(frame: &str) -> Reply {
    let request: Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(_) => return Reply::Silent,
    };
    let id = request["i"].clone();
    let payload = &request["m"];

    let reply = if let Some(fields) = payload.as_object() {
        let mut fields = fields.clone();
        fields.remove("cmd");
        Value::Object(fields)
    } else {
        match payload[0].as_str().unwrap_or_default() {
            "echo" => payload[1].clone(),
            "fail" => json!("error"),
            "slow" => {
                let ms = payload[1].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                payload[2].clone()
            }
            "ignore" => return Reply::Silent,
            "hangup" => return Reply::HangUp,
            other => json!({ "unknown": other }),
        }
    };

    Reply::Send(json!({ "i": id, "m": reply }).to_string())
}

/// Per-connection fan-in: each request is answered on its own task so slow
/// replies can overtake each other.
async fn serve_requests(
    mut inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Option<String>>,
) {
    while let Some(frame) = inbound.recv().await {
        let outbound = outbound.clone();
        tokio::spawn(async move {
            match respond(&frame).await {
                Reply::Send(text) => {
                    let _ = outbound.send(Some(text));
                }
                Reply::Silent => {}
                Reply::HangUp => {
                    let _ = outbound.send(None);
                }
            }
        });
    }
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// WebSocket server that insists on the `vetclix` sub-protocol.
pub async fn start_ws_server() -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_ws(stream));
        }
    });
    addr
}

async fn serve_ws(stream: TcpStream) {
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let offered = request
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if offered.split(',').any(|p| p.trim() == "vetclix") {
            response
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("vetclix"));
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("vetclix sub-protocol required".to_string()));
            *rejection.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::BAD_REQUEST;
            Err(rejection)
        }
    };

    let Ok(socket) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut sink, mut stream) = socket.split();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    tokio::spawn(serve_requests(in_rx, out_tx));

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = in_tx.send(text.as_str().to_owned());
                }
                Some(Ok(_)) => {}
                _ => break,
            },
            reply = out_rx.recv() => match reply {
                Some(Some(text)) => {
                    if sink.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                _ => {
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }
}

/// Length-delimited TCP server.
pub async fn start_tcp_server() -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_tcp(stream));
        }
    });
    addr
}

async fn serve_tcp(stream: TcpStream) {
    let framed = Framed::new(stream, FrameCodec::new(64 * 1024));
    let (mut sink, mut stream) = framed.split::<bytes::Bytes>();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    tokio::spawn(serve_requests(in_rx, out_tx));

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(InboundFrame::Data(bytes))) => {
                    let _ = in_tx.send(String::from_utf8_lossy(&bytes).into_owned());
                }
                _ => break,
            },
            reply = out_rx.recv() => match reply {
                Some(Some(text)) => {
                    if sink.send(bytes::Bytes::from(text)).await.is_err() {
                        break;
                    }
                }
                _ => break,
            },
        }
    }
}

/// An address nothing is listening on.
pub async fn dead_address() -> SocketAddr {
    let (listener, addr) = bind().await;
    drop(listener);
    addr
}

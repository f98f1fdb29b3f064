//! Raw TCP connector with length-delimited frames.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{future, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use super::{Connector, FrameChannel};
use crate::rpc::codec::{FrameCodec, InboundFrame};
use crate::types::{Error, Result};

/// Connects to `host:port` (an optional `tcp://` prefix is ignored).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    max_frame_bytes: usize,
}

impl TcpConnector {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str) -> Result<FrameChannel> {
        let address = address.strip_prefix("tcp://").unwrap_or(address);
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;

        let max_frame_bytes = self.max_frame_bytes;
        let framed = Framed::new(stream, FrameCodec::new(max_frame_bytes));
        let (sink, stream): (SplitSink<_, Bytes>, _) = framed.split();
        let sink = sink
            .sink_map_err(Error::from)
            .with(|frame: String| future::ready(Ok::<_, Error>(Bytes::from(frame))));
        let stream = stream.map(move |frame| match frame {
            Ok(InboundFrame::Data(bytes)) => String::from_utf8(bytes.to_vec())
                .map_err(|e| Error::malformed(format!("frame is not UTF-8: {}", e))),
            Ok(InboundFrame::Oversized(len)) => Err(Error::malformed(format!(
                "frame of {} bytes exceeds the {} byte limit",
                len, max_frame_bytes
            ))),
            Err(e) => Err(Error::from(e)),
        });

        Ok(FrameChannel {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

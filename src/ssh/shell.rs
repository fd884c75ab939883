//! Interactive PTY shell over a russh session channel.

use std::time::Duration;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tracing::debug;

use super::{InteractiveShell, SshError};

pub(crate) struct PtyShell {
    channel: Channel<Msg>,
    closed: bool,
}

impl PtyShell {
    pub(crate) fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            closed: false,
        }
    }
}

#[async_trait]
impl InteractiveShell for PtyShell {
    async fn send_line(&mut self, line: &str) -> Result<(), SshError> {
        if self.closed {
            return Err(SshError::Channel("shell channel closed".to_string()));
        }
        let data = format!("{}\n", line);
        self.channel
            .data(data.as_bytes())
            .await
            .map_err(|e| SshError::Channel(e.to_string()))
    }

    async fn read_available(&mut self, idle: Duration) -> Result<String, SshError> {
        let mut buffer = Vec::new();

        while !self.closed {
            match tokio::time::timeout(idle, self.channel.wait()).await {
                // A PTY merges stderr into the data stream.
                Ok(Some(ChannelMsg::Data { data }))
                | Ok(Some(ChannelMsg::ExtendedData { data, .. })) => {
                    buffer.extend_from_slice(&data);
                }
                Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) | Ok(None) => {
                    debug!("[escalate] shell channel closed by remote");
                    self.closed = true;
                }
                Ok(Some(_)) => {}
                Err(_) => break,
            }
        }

        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.channel.close().await {
            debug!("[escalate] shell close: {}", e);
        }
    }
}

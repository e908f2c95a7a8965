//! Server-sent-event subscriber.
//!
//! Reconnects with a fixed delay and throttles the reconnect error log so a
//! server outage does not flood the journal. Parsed events are forwarded to
//! the session driver over an mpsc channel.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::{Client, Url};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::client::api::ClientError;
use crate::push::PushEvent;

#[cfg(not(test))]
const RECONNECT_DELAY: Duration = Duration::from_secs(3);
#[cfg(test)]
const RECONNECT_DELAY: Duration = Duration::from_millis(5);

const LOG_THROTTLE_WINDOW: Duration = Duration::from_secs(30);

/// At most one log line per window.
#[derive(Debug, Default)]
struct LogThrottle {
    last: Option<Instant>,
}

impl LogThrottle {
    fn should_log(&mut self, now: Instant) -> bool {
        let open = self
            .last
            .is_none_or(|last| now.duration_since(last) >= LOG_THROTTLE_WINDOW);
        if open {
            self.last = Some(now);
        }
        open
    }
}

/// Incremental `data:` line parser. SSE frames may arrive split across
/// arbitrary chunk boundaries; the tail is buffered until its newline shows
/// up.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &str) -> Vec<PushEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end();
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            match serde_json::from_str::<PushEvent>(payload.trim_start()) {
                Ok(event) => events.push(event),
                Err(error) => warn!(error = %error, "discarding malformed push event"),
            }
        }
        events
    }
}

/// Long-lived SSE subscription to `/api/device/stream/`.
pub struct EventStream {
    client: Client,
    url: Url,
}

impl EventStream {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    /// Pump events into `tx` until shutdown. Connection failures reconnect
    /// after a fixed delay forever; the session keeps polling meanwhile.
    pub async fn run(self, tx: mpsc::Sender<PushEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut throttle = LogThrottle::default();
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.connect_once(&tx, &mut shutdown).await {
                Ok(()) => {
                    if *shutdown.borrow() || tx.is_closed() {
                        return;
                    }
                    debug!("event stream closed; reconnecting");
                }
                Err(error) => {
                    if throttle.should_log(Instant::now()) {
                        warn!(error = %error, "event stream failed; reconnecting");
                    }
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn connect_once(
        &self,
        tx: &mpsc::Sender<PushEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|error| ClientError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!(
                "stream rejected: status {}",
                status.as_u16()
            )));
        }

        let mut body = response.bytes_stream();
        let mut parser = SseParser::default();
        loop {
            tokio::select! {
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for event in parser.feed(&String::from_utf8_lossy(&bytes)) {
                            if tx.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Err(error)) => {
                        return Err(ClientError::Transport(error.to_string()));
                    }
                    None => return Ok(()),
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

use log::{debug, info, warn};
use rand::Rng;
use shared::{read_frame, write_frame, ClientEvent, CodecError, ServerEvent};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// How long a rejoin may wait for `sync:state` before it counts as failed.
    pub reply_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
            reply_timeout: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before attempt `attempt` (zero based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Backoff with jitter: uniformly between half and all of the base delay.
    pub fn delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        self.base_delay(attempt).mul_f64(rng.gen_range(0.5..=1.0))
    }
}

/// A joined session with the realm server.
///
/// Server events are read on a background task and queued; `recv` yields
/// them in arrival order and returns `None` once the stream is gone.
pub struct Connection {
    addr: String,
    join: ClientEvent,
    writer: OwnedWriteHalf,
    events: UnboundedReceiver<ServerEvent>,
    reader: JoinHandle<()>,
    /// The `sync:state` a rejoin consumed, handed out by the next `recv`.
    replay: Option<ServerEvent>,
}

impl Connection {
    /// Connects and sends `player:join`. The reply (`sync:state` or an
    /// error) arrives through `recv`.
    pub async fn connect(addr: &str, join: ClientEvent) -> Result<Self, Box<dyn std::error::Error>> {
        let (writer, events, reader) = open(addr).await?;
        let mut connection = Self {
            addr: addr.to_string(),
            join,
            writer,
            events,
            reader,
            replay: None,
        };
        connection.send_join().await?;
        info!("Connected to {}", connection.addr);
        Ok(connection)
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), CodecError> {
        debug!("-> {}", event.name());
        write_frame(&mut self.writer, event).await
    }

    pub async fn recv(&mut self) -> Option<ServerEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        self.events.try_recv().ok()
    }

    /// Position to rejoin at after a reconnect.
    pub fn set_rejoin_position(&mut self, new_x: f32, new_y: f32) {
        if let ClientEvent::Join { x, y, .. } = &mut self.join {
            *x = new_x;
            *y = new_y;
        }
    }

    /// Drops the current stream and retries with backoff until the server
    /// answers a rejoin with `sync:state` or the policy gives up. A refused
    /// rejoin (e.g. the old session still holds the name) is retried.
    /// Returns the number of attempts used.
    pub async fn reconnect<R: Rng>(
        &mut self,
        policy: &ReconnectPolicy,
        rng: &mut R,
    ) -> Result<u32, Box<dyn std::error::Error>> {
        self.drop_stream().await;

        for attempt in 0..policy.max_attempts {
            let delay = policy.delay(attempt, rng);
            info!(
                "Reconnecting to {} in {:?} (attempt {}/{})",
                self.addr,
                delay,
                attempt + 1,
                policy.max_attempts
            );
            sleep(delay).await;

            match self.rejoin(policy.reply_timeout).await {
                Ok(()) => {
                    info!("Reconnected to {}", self.addr);
                    return Ok(attempt + 1);
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt + 1, e);
                    self.drop_stream().await;
                }
            }
        }

        Err(format!(
            "gave up on {} after {} attempts",
            self.addr, policy.max_attempts
        )
        .into())
    }

    /// Opens a fresh stream, sends the join and waits for its answer.
    async fn rejoin(&mut self, reply_timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
        let (writer, events, reader) = open(&self.addr).await?;
        self.reader.abort();
        self.writer = writer;
        self.events = events;
        self.reader = reader;
        self.replay = None;
        self.send_join().await?;

        let reply = timeout(reply_timeout, async {
            loop {
                match self.events.recv().await {
                    Some(event @ ServerEvent::SyncState { .. }) => return Ok(event),
                    Some(ServerEvent::Error { code, message }) => {
                        return Err(format!("rejoin refused ({:?}): {}", code, message))
                    }
                    Some(other) => debug!("Ignoring {} before rejoin reply", other.name()),
                    None => return Err("connection closed before rejoin reply".to_string()),
                }
            }
        })
        .await
        .map_err(|_| format!("no rejoin reply within {:?}", reply_timeout))??;

        self.replay = Some(reply);
        Ok(())
    }

    async fn drop_stream(&mut self) {
        self.reader.abort();
        let _ = self.writer.shutdown().await;
    }

    async fn send_join(&mut self) -> Result<(), CodecError> {
        let join = self.join.clone();
        self.send(&join).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn open(
    addr: &str,
) -> Result<(OwnedWriteHalf, UnboundedReceiver<ServerEvent>, JoinHandle<()>), std::io::Error> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_loop(read_half, tx));
    Ok((write_half, rx, reader))
}

async fn read_loop(mut reader: OwnedReadHalf, tx: UnboundedSender<ServerEvent>) {
    loop {
        match read_frame::<_, ServerEvent>(&mut reader).await {
            Ok(event) => {
                debug!("<- {}", event.name());
                if tx.send(event).is_err() {
                    return;
                }
            }
            Err(CodecError::ConnectionClosed) => {
                info!("Server closed the connection");
                return;
            }
            Err(e) => {
                warn!("Dropping connection: {}", e);
                return;
            }
        }
    }
}

//! One control connection
//!
//! After the handshake the socket is split between a writer task that
//! drains the client's command queue and a reader task that forwards
//! notification lines to the coordinator's event channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use st_core::config::ClientProfile;
use st_core::error::ConnectionError;
use st_core::ClientId;
use st_protocol::{
    is_notice_line, Command, ControlCodec, ControlLine, ProtocolError, Reply, BANDWIDTH_EVENT,
    MAX_LINE_LENGTH, SPEEDTEST_EVENT,
};

use crate::dispatcher::ControlEvent;

/// Commands queued per client before sends start failing.
///
/// The scheduler issues at most two commands per client per tick, so this
/// only fills up when the writer is wedged on a dead socket.
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// How long `close` waits for queued commands and QUIT to be written
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type ControlFramed = Framed<TcpStream, ControlCodec>;

/// Handle to a live control connection
pub struct ControllerHandle {
    client: ClientId,
    command_tx: mpsc::Sender<Command>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl ControllerHandle {
    /// Client this connection belongs to
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// Whether both halves of the connection are still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Queue a command without waiting
    pub fn send(&self, command: Command) -> Result<(), ConnectionError> {
        if !self.is_alive() {
            return Err(ConnectionError::Closed(self.client.clone()));
        }
        self.command_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::QueueFull(self.client.clone()),
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed(self.client.clone()),
        })
    }

    /// Flush queued commands, say QUIT and stop both tasks.
    ///
    /// A connection that is already gone is not an error.
    pub async fn close(&self) {
        if self.command_tx.try_send(Command::Quit).is_err() {
            tracing::debug!("{}: connection already closed", self.client);
        }

        let writer = self.writer.lock().ok().and_then(|mut w| w.take());
        if let Some(writer) = writer {
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                tracing::warn!("{}: writer did not finish within {:?}", self.client, CLOSE_GRACE);
            }
        }

        self.cancel.cancel();
        self.alive.store(false, Ordering::Release);
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connect to a client's control port and bring the connection up.
///
/// Authenticates, subscribes to speed-test events (bandwidth events when
/// the client offers them) and starts the reader and writer tasks.
/// Notification lines are sent to `events`.
pub async fn connect(
    client: ClientId,
    profile: &ClientProfile,
    connect_timeout: Duration,
    events: mpsc::Sender<ControlEvent>,
) -> Result<ControllerHandle, ConnectionError> {
    let address = profile.control_address.clone();
    tracing::debug!("Connecting to {} at {}", client, address);

    let framed = tokio::time::timeout(connect_timeout, async {
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|source| ConnectionError::ConnectFailed {
                client: client.clone(),
                address: address.clone(),
                source,
            })?;
        let mut framed = Framed::new(stream, ControlCodec::new());
        handshake(&client, profile, &mut framed).await?;
        Ok::<_, ConnectionError>(framed)
    })
    .await
    .map_err(|_| ConnectionError::Timeout {
        client: client.clone(),
        address: address.clone(),
    })??;

    tracing::info!("Connected to {} at {}", client, address);

    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let alive = Arc::new(AtomicBool::new(true));
    let cancel = CancellationToken::new();
    let (sink, stream) = framed.split();

    let writer = tokio::spawn(write_loop(
        client.clone(),
        sink,
        command_rx,
        Arc::clone(&alive),
        cancel.clone(),
    ));
    tokio::spawn(read_loop(
        client.clone(),
        stream,
        events,
        Arc::clone(&alive),
        cancel.clone(),
    ));

    Ok(ControllerHandle {
        client,
        command_tx,
        alive,
        cancel,
        writer: Mutex::new(Some(writer)),
    })
}

async fn handshake(
    client: &ClientId,
    profile: &ClientProfile,
    framed: &mut ControlFramed,
) -> Result<(), ConnectionError> {
    let auth = Command::Authenticate {
        secret: profile.password.clone(),
    };
    let reply = request(client, framed, auth).await?;
    if !reply.is_ok() {
        return Err(ConnectionError::Rejected {
            client: client.clone(),
            command: "AUTHENTICATE".to_string(),
            reply: reply.to_string(),
        });
    }

    let with_bandwidth = Command::SetEvents {
        events: vec![SPEEDTEST_EVENT.to_string(), BANDWIDTH_EVENT.to_string()],
    };
    let reply = request(client, framed, with_bandwidth).await?;
    if reply.is_ok() {
        return Ok(());
    }
    tracing::warn!(
        "{} refused {} events ({}), continuing without them",
        client,
        BANDWIDTH_EVENT,
        reply
    );

    let speedtest_only = Command::SetEvents {
        events: vec![SPEEDTEST_EVENT.to_string()],
    };
    let reply = request(client, framed, speedtest_only).await?;
    if !reply.is_ok() {
        return Err(ConnectionError::CapabilityUnavailable {
            client: client.clone(),
            capability: SPEEDTEST_EVENT.to_string(),
        });
    }

    Ok(())
}

/// Send `command` and wait for its reply, skipping asynchronous events
async fn request(
    client: &ClientId,
    framed: &mut ControlFramed,
    command: Command,
) -> Result<Reply, ConnectionError> {
    let protocol = |source: ProtocolError| ConnectionError::Protocol {
        client: client.clone(),
        source,
    };

    framed.send(command).await.map_err(protocol)?;

    while let Some(line) = framed.next().await {
        let line = match line.map_err(protocol)? {
            ControlLine::Text(line) => line,
            ControlLine::Oversized => {
                tracing::warn!("{}: dropped a line over {} bytes", client, MAX_LINE_LENGTH);
                continue;
            }
        };
        match Reply::parse(&line) {
            Some(reply) => return Ok(reply),
            None => tracing::trace!("{}: skipping {:?} during handshake", client, line),
        }
    }

    Err(ConnectionError::Closed(client.clone()))
}

async fn write_loop(
    client: ClientId,
    mut sink: futures::stream::SplitSink<ControlFramed, Command>,
    mut commands: mpsc::Receiver<Command>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        let quit = command == Command::Quit;
        if let Err(e) = sink.send(command).await {
            tracing::warn!("{}: write failed: {}", client, e);
            alive.store(false, Ordering::Release);
            break;
        }
        if quit {
            break;
        }
    }
    tracing::debug!("{}: writer stopped", client);
}

async fn read_loop(
    client: ClientId,
    mut stream: futures::stream::SplitStream<ControlFramed>,
    events: mpsc::Sender<ControlEvent>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = stream.next() => line,
        };

        match line {
            Some(Ok(ControlLine::Text(line))) => {
                if is_notice_line(&line) {
                    let event = ControlEvent {
                        client: client.clone(),
                        line,
                    };
                    let sent = tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = events.send(event) => sent,
                    };
                    if sent.is_err() {
                        break;
                    }
                } else if let Some(reply @ Reply::Error { .. }) = Reply::parse(&line) {
                    tracing::warn!("{} refused a command: {}", client, reply);
                } else {
                    tracing::trace!("{}: {}", client, line);
                }
            }
            Some(Ok(ControlLine::Oversized)) => {
                tracing::warn!("{}: dropped a line over {} bytes", client, MAX_LINE_LENGTH);
            }
            Some(Err(e)) => {
                tracing::warn!("{}: read failed: {}", client, e);
                alive.store(false, Ordering::Release);
                break;
            }
            None => {
                tracing::warn!("{}: control connection closed", client);
                alive.store(false, Ordering::Release);
                break;
            }
        }
    }
    tracing::debug!("{}: reader stopped", client);
}

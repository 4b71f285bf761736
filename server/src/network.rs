//! TCP transport: length-prefixed bincode frames in both directions.
//!
//! Each accepted socket gets its own task. After a client establishes its
//! player identity (create, join, or reconnect), a push task subscribes to
//! the session and streams a fresh [`SessionView`] on every change while the
//! main task keeps reading actions. A socket dropping silently is not a
//! leave: the player's connection stays in the session and a reconnect with
//! the issued player id re-attaches to it.

use crate::coordinator::{Coordinator, Subscription};
use crate::error::CoordinatorError;
use log::{debug, info, warn};
use shared::{Action, Packet, PlayerId, SessionId};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Upper bound on a single frame's payload. Views are small; anything larger
/// is a corrupt or hostile stream.
const MAX_FRAME_LEN: u32 = 64 * 1024;

/// A client that sends nothing (not even heartbeats) for this long is
/// disconnected. Its session connection survives for a later reconnect.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct NetworkServer {
    address: String,
    coordinator: Arc<Coordinator>,
}

impl NetworkServer {
    pub fn new(address: impl Into<String>, coordinator: Arc<Coordinator>) -> Self {
        NetworkServer {
            address: address.into(),
            coordinator,
        }
    }

    pub async fn run(&self) -> io::Result<()> {
        let listener = TcpListener::bind(&self.address).await?;
        info!("Listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("Client connected from {}", addr);
            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                match handle_client(stream, addr, coordinator).await {
                    Ok(()) => debug!("Client {} disconnected", addr),
                    Err(e) => debug!("Client {} dropped: {}", addr, e),
                }
            });
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    coordinator: Arc<Coordinator>,
) -> io::Result<()> {
    let (mut reader, writer) = stream.into_split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let write_task = tokio::spawn(write_loop(writer, out_rx));

    let mut attachment: Option<Attachment> = None;

    loop {
        let packet = match tokio::time::timeout(CLIENT_TIMEOUT, read_frame(&mut reader)).await {
            Ok(Ok(Some(packet))) => packet,
            Ok(Ok(None)) => break, // clean EOF
            Ok(Err(e)) => {
                write_task.abort();
                return Err(e);
            }
            Err(_) => {
                debug!("Client {} timed out", addr);
                break;
            }
        };

        match packet {
            Packet::Heartbeat => {}

            Packet::Create { player_name } if attachment.is_none() => {
                let (player_id, session_id) = coordinator.create_session(&player_name);
                attachment = attach(&coordinator, &player_id, &session_id, &out_tx);
            }

            Packet::Join {
                session_id,
                player_name,
            } if attachment.is_none() => {
                match coordinator.join_session(&session_id, &player_name) {
                    Ok((player_id, session_id)) => {
                        attachment = attach(&coordinator, &player_id, &session_id, &out_tx);
                    }
                    Err(e) => send_error(&out_tx, e),
                }
            }

            Packet::Reconnect { player_id } if attachment.is_none() => {
                match coordinator.session_id_of(&player_id) {
                    Ok(session_id) => {
                        info!("Player {} re-attached from {}", player_id, addr);
                        attachment = attach(&coordinator, &player_id, &session_id, &out_tx);
                    }
                    Err(e) => send_error(&out_tx, e),
                }
            }

            Packet::Act { action } => match &attachment {
                Some(att) => {
                    let leaving = action == Action::Leave;
                    match coordinator.apply(att.player_id(), action) {
                        Ok(()) if leaving => break,
                        Ok(()) => {}
                        Err(e) => send_error(&out_tx, e),
                    }
                }
                None => {
                    let _ = out_tx.send(Packet::Error {
                        reason: "not attached to a session".to_string(),
                    });
                }
            },

            other => {
                warn!("Unexpected packet from {}: {:?}", addr, other);
                let _ = out_tx.send(Packet::Error {
                    reason: "unexpected packet".to_string(),
                });
            }
        }
    }

    drop(attachment); // stop pushing before the writer drains
    drop(out_tx);
    let _ = write_task.await;
    Ok(())
}

/// Subscribes the player to session changes and starts streaming views.
/// Returns `None` if the player vanished between identity setup and here.
fn attach(
    coordinator: &Arc<Coordinator>,
    player_id: &PlayerId,
    session_id: &SessionId,
    out_tx: &UnboundedSender<Packet>,
) -> Option<Attachment> {
    let subscription = match coordinator.subscribe(player_id) {
        Ok(subscription) => subscription,
        Err(e) => {
            send_error(out_tx, e);
            return None;
        }
    };
    let _ = out_tx.send(Packet::Connected {
        player_id: player_id.clone(),
        session_id: session_id.as_str().to_string(),
    });
    if let Ok(view) = coordinator.view(player_id) {
        let _ = out_tx.send(Packet::View { view });
    }
    Some(Attachment::spawn(
        Arc::clone(coordinator),
        player_id.clone(),
        subscription,
        out_tx.clone(),
    ))
}

/// A running view-push task. Dropping the attachment aborts the task, which
/// drops the subscription and unregisters the session listener.
struct Attachment {
    player_id: PlayerId,
    pusher: JoinHandle<()>,
}

impl Attachment {
    fn spawn(
        coordinator: Arc<Coordinator>,
        player_id: PlayerId,
        mut subscription: Subscription,
        out_tx: UnboundedSender<Packet>,
    ) -> Self {
        let pusher_id = player_id.clone();
        let pusher = tokio::spawn(async move {
            while subscription.changed().await.is_some() {
                match coordinator.view(&pusher_id) {
                    Ok(view) => {
                        if out_tx.send(Packet::View { view }).is_err() {
                            break;
                        }
                    }
                    // Player left or session destroyed; nothing more to push.
                    Err(_) => break,
                }
            }
        });
        Attachment { player_id, pusher }
    }

    fn player_id(&self) -> &PlayerId {
        &self.player_id
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.pusher.abort();
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut out_rx: UnboundedReceiver<Packet>) {
    while let Some(packet) = out_rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &packet).await {
            debug!("Write failed: {}", e);
            break;
        }
    }
}

fn send_error(out_tx: &UnboundedSender<Packet>, error: CoordinatorError) {
    let _ = out_tx.send(Packet::Error {
        reason: error.to_string(),
    });
}

/// Reads one length-prefixed frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Packet>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, packet: &Packet) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload =
        bincode::serialize(packet).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

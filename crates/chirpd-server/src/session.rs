//! One session per TCP connection: authenticate, then loop over command
//! lines until the client hangs up, sends end-of-transmission, or stalls.
//!
//! Commands within a session run serially. All error translation to wire
//! codes happens here, once, when a response line is written.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, Outcome};
use crate::error;
use crate::server::ServerState;
use crate::wire::{self, Request};

/// Terminates the session cleanly when received at the start of a line.
const EOT: u8 = 0x04;

const CHUNK: usize = 64 * 1024;

/// Seconds allowed for a transfer of `bytes`, floored at 1 KiB/s so a slow
/// but live client is never cut off.
fn transfer_timeout(state: &ServerState, bytes: u64) -> Duration {
    Duration::from_secs(state.config.stall_timeout_secs.max(bytes / 1024))
}

/// Drives one connection to completion.
pub async fn serve_connection(state: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
    state.stats.record_connection();
    let mut stream = BufStream::new(stream);

    let subject = match state.auth.authenticate(&mut stream, peer).await {
        Ok(Some(subject)) => subject,
        Ok(None) => {
            debug!(%peer, "authentication failed");
            return;
        }
        Err(e) => {
            debug!(%peer, error = %e, "authentication aborted");
            return;
        }
    };
    info!(%peer, subject = %subject, "session opened");

    let mut dispatcher = Dispatcher::new(
        Arc::clone(&state.fs),
        Arc::clone(&state.acl),
        Arc::clone(&state.alloc),
        Arc::clone(&state.tickets),
        Arc::clone(&state.jobs),
        Arc::clone(&state.config),
        Arc::clone(&state.stats),
        subject,
    );

    if let Err(e) = run_session(&state, &mut stream, &mut dispatcher).await {
        debug!(%peer, error = %e, "session transport error");
    }
    let _ = stream.flush().await;
    if let Err(e) = state.alloc.flush() {
        debug!(%peer, error = %e, "allocation flush failed at session end");
    }
    info!(%peer, "session closed");
}

async fn run_session(
    state: &ServerState,
    stream: &mut BufStream<TcpStream>,
    dispatcher: &mut Dispatcher,
) -> std::io::Result<()> {
    let idle = Duration::from_secs(state.config.idle_timeout_secs);
    loop {
        let mut line = String::new();
        let n = match timeout(idle, stream.read_line(&mut line)).await {
            Ok(result) => result?,
            Err(_) => {
                debug!(subject = dispatcher.subject(), "idle timeout");
                return Ok(());
            }
        };
        if n == 0 || line.as_bytes()[0] == EOT {
            return Ok(());
        }
        let command = line.trim_end();
        if command.is_empty() {
            continue;
        }
        debug!(subject = dispatcher.subject(), command, "request");
        state.stats.record_op();

        let req = match Request::parse(command) {
            Ok(req) => req,
            Err(e) => {
                write_code(stream, error::to_wire(e)).await?;
                continue;
            }
        };

        let payload = match req.payload_len() {
            Some(len) if len < 0 => {
                write_code(stream, error::INVALID_REQUEST).await?;
                continue;
            }
            Some(len) => read_payload(state, stream, len as u64).await?,
            None => Vec::new(),
        };

        // putfile data follows the request unconditionally; a refusal still
        // has to drain it before the next command line.
        let inbound = match &req {
            Request::Putfile { length, .. } => Some((*length).max(0) as u64),
            _ => None,
        };

        match dispatcher.dispatch(req, &payload) {
            Ok(outcome) => {
                if !handle_outcome(state, stream, outcome).await? {
                    return Ok(());
                }
            }
            Err(e) => {
                if let Some(len) = inbound {
                    soak(state, stream, len).await?;
                }
                write_code(stream, error::to_wire(e)).await?;
            }
        }
    }
}

async fn write_code(stream: &mut BufStream<TcpStream>, code: i64) -> std::io::Result<()> {
    stream.write_all(format!("{code}\n").as_bytes()).await?;
    stream.flush().await
}

/// Reads a command payload. Anything past the buffer cap is drained and
/// discarded, so an oversized write succeeds partially instead of wedging
/// the connection.
async fn read_payload(
    state: &ServerState,
    stream: &mut BufStream<TcpStream>,
    length: u64,
) -> std::io::Result<Vec<u8>> {
    let want = (length as usize).min(state.config.max_buffer_size);
    let allowed = transfer_timeout(state, length);
    let mut buf = vec![0u8; want];
    match timeout(allowed, async {
        stream.read_exact(&mut buf).await?;
        soak_inner(stream, length - want as u64).await
    })
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(std::io::ErrorKind::TimedOut.into()),
    }
    Ok(buf)
}

async fn soak(
    state: &ServerState,
    stream: &mut BufStream<TcpStream>,
    length: u64,
) -> std::io::Result<()> {
    let allowed = transfer_timeout(state, length);
    match timeout(allowed, soak_inner(stream, length)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::ErrorKind::TimedOut.into()),
    }
}

async fn soak_inner(stream: &mut BufStream<TcpStream>, mut left: u64) -> std::io::Result<()> {
    let mut scratch = [0u8; CHUNK];
    while left > 0 {
        let n = (left as usize).min(CHUNK);
        stream.read_exact(&mut scratch[..n]).await?;
        left -= n as u64;
    }
    Ok(())
}

/// Acts on a dispatched outcome. Returns false when the session must end,
/// which the streaming verbs do by design.
async fn handle_outcome(
    state: &ServerState,
    stream: &mut BufStream<TcpStream>,
    outcome: Outcome,
) -> std::io::Result<bool> {
    match outcome {
        Outcome::Reply(reply) => {
            stream.write_all(&wire::render(&reply)).await?;
            stream.flush().await?;
            Ok(true)
        }
        Outcome::SendFile { size, file } => {
            stream.write_all(format!("{size}\n").as_bytes()).await?;
            let allowed = transfer_timeout(state, size as u64);
            match timeout(allowed, send_bytes(state, stream, file.as_ref(), size)).await {
                Ok(Ok(())) => {
                    stream.flush().await?;
                    Ok(true)
                }
                // Mid-transfer failure leaves the stream unframed; the only
                // safe recovery is to drop the connection.
                _ => Ok(false),
            }
        }
        Outcome::SendStream { file } => {
            stream.write_all(b"0\n").await?;
            let _ = send_bytes(state, stream, file.as_ref(), i64::MAX).await;
            let _ = stream.flush().await;
            Ok(false)
        }
        Outcome::Receive {
            file,
            length,
            reservation,
        } => {
            let allowed = transfer_timeout(state, length as u64);
            match timeout(allowed, receive_bytes(state, stream, file.as_ref(), length)).await {
                Ok(Ok(())) => {
                    reservation.commit();
                    write_code(stream, length).await?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
        Outcome::ReceiveStream { file, path } => {
            stream.write_all(b"0\n").await?;
            stream.flush().await?;
            let _ = receive_stream(state, stream, file.as_ref(), &path).await;
            Ok(false)
        }
    }
}

async fn send_bytes(
    state: &ServerState,
    stream: &mut BufStream<TcpStream>,
    file: &dyn chirpd_vfs::VfsFile,
    limit: i64,
) -> std::io::Result<()> {
    let mut buf = [0u8; CHUNK];
    let mut offset: i64 = 0;
    while offset < limit {
        let want = CHUNK.min((limit - offset) as u64 as usize);
        let n = file
            .pread(&mut buf[..want], offset)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::Other))?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
        offset += n as i64;
        state.stats.record_read(n as u64);
    }
    Ok(())
}

async fn receive_bytes(
    state: &ServerState,
    stream: &mut BufStream<TcpStream>,
    file: &dyn chirpd_vfs::VfsFile,
    length: i64,
) -> std::io::Result<()> {
    let mut buf = [0u8; CHUNK];
    let mut offset: i64 = 0;
    while offset < length {
        let n = CHUNK.min((length - offset) as u64 as usize);
        stream.read_exact(&mut buf[..n]).await?;
        file.pwrite(&buf[..n], offset)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::Other))?;
        offset += n as i64;
        state.stats.record_written(n as u64);
    }
    Ok(())
}

/// Appends everything the client sends until it closes its end. Each chunk
/// is reserved against the allocation before it lands on disk.
async fn receive_stream(
    state: &ServerState,
    stream: &mut BufStream<TcpStream>,
    file: &dyn chirpd_vfs::VfsFile,
    path: &str,
) -> std::io::Result<()> {
    let mut buf = [0u8; CHUNK];
    let mut offset: i64 = 0;
    loop {
        let n = match timeout(
            Duration::from_secs(state.config.stall_timeout_secs),
            stream.read(&mut buf),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(std::io::ErrorKind::TimedOut.into()),
        };
        if n == 0 {
            let _ = state.alloc.flush();
            return Ok(());
        }
        let reservation = state
            .alloc
            .reserve(path, offset + n as i64)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::Other))?;
        file.pwrite(&buf[..n], offset)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::Other))?;
        reservation.commit();
        offset += n as i64;
        state.stats.record_written(n as u64);
    }
}

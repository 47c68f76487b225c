//! Newline-delimited JSON framing shared by the plugin server and client.

use std::io;

use machina_protocol::MAX_MESSAGE_LEN;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one message line into `line`.
///
/// Returns `Ok(false)` on a clean EOF before any byte of a new message.
pub(crate) async fn read_message<R>(reader: &mut R, line: &mut String) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader)
        .take(MAX_MESSAGE_LEN as u64 + 1)
        .read_line(line)
        .await?;

    if n == 0 {
        return Ok(false);
    }
    if !line.ends_with('\n') {
        if n > MAX_MESSAGE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message exceeds {} bytes", MAX_MESSAGE_LEN),
            ));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-message",
        ));
    }
    Ok(true)
}

/// Serialize `message` as one newline-terminated line.
///
/// Fails with `InvalidData` when the line would exceed [`MAX_MESSAGE_LEN`],
/// before anything reaches the peer.
pub(crate) fn encode_message<T: Serialize>(message: &T) -> io::Result<Vec<u8>> {
    let mut encoded = serde_json::to_vec(message)?;
    if encoded.len() + 1 > MAX_MESSAGE_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "message of {} bytes exceeds {} bytes",
                encoded.len() + 1,
                MAX_MESSAGE_LEN
            ),
        ));
    }
    encoded.push(b'\n');
    Ok(encoded)
}

/// Write an encoded line and flush it.
pub(crate) async fn write_line<W>(writer: &mut W, encoded: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await
}

/// Serialize `message` as one line and flush it.
pub(crate) async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = encode_message(message)?;
    write_line(writer, &encoded).await
}

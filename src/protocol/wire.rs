//! Wire format for message framing.
//!
//! Messages are length-prefixed: [4 bytes big-endian u32][payload]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{GatewayError, ProtocolErrorKind};

/// Default maximum frame size (1 MiB); overridden by `limits.max_message_size`.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read a length-prefixed message from the reader.
///
/// # Arguments
///
/// * `reader` - Stream positioned at the start of a frame
/// * `max_size` - Largest payload accepted, in bytes
///
/// # Returns
///
/// The raw bytes of the message payload.
///
/// # Errors
///
/// Returns an error if:
/// - The peer closed the stream before a length prefix (`ConnectionClosed`)
/// - The declared length exceeds `max_size` (`MessageTooLarge`)
/// - Reading fails
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, GatewayError>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(GatewayError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            });
        }
        Err(e) => return Err(GatewayError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(GatewayError::Protocol {
            kind: ProtocolErrorKind::MessageTooLarge {
                size: len,
                max: max_size,
            },
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Write a length-prefixed message to the writer.
///
/// # Arguments
///
/// * `writer` - Stream to write the frame to
/// * `data` - Payload bytes
///
/// # Errors
///
/// Returns an error if the payload does not fit a `u32` length prefix or if
/// writing fails.
pub async fn write_message<W>(writer: &mut W, data: &[u8]) -> Result<(), GatewayError>
where
    W: AsyncWriteExt + Unpin,
{
    let len = u32::try_from(data.len()).map_err(|_| GatewayError::Protocol {
        kind: ProtocolErrorKind::MessageTooLarge {
            size: data.len(),
            max: u32::MAX as usize,
        },
    })?;
    let len = len.to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed message with a timeout.
///
/// # Arguments
///
/// * `reader` - Stream positioned at the start of a frame
/// * `max_size` - Largest payload accepted, in bytes
/// * `timeout_duration` - Upper bound on reading the whole frame
///
/// # Errors
///
/// Returns a `ConnectionTimeout` error if the read takes longer than
/// `timeout_duration`, otherwise the errors of [`read_message`].
pub async fn read_message_with_timeout<R>(
    reader: &mut R,
    max_size: usize,
    timeout_duration: Duration,
) -> Result<Vec<u8>, GatewayError>
where
    R: AsyncReadExt + Unpin,
{
    timeout(timeout_duration, read_message(reader, max_size))
        .await
        .map_err(|_| GatewayError::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        })?
}

/// Write a length-prefixed message with a timeout.
///
/// # Arguments
///
/// * `writer` - Stream to write the frame to
/// * `data` - Payload bytes
/// * `timeout_duration` - Upper bound on writing and flushing the frame
///
/// # Errors
///
/// Returns a `ConnectionTimeout` error if the write takes longer than
/// `timeout_duration`, otherwise the errors of [`write_message`].
pub async fn write_message_with_timeout<W>(
    writer: &mut W,
    data: &[u8],
    timeout_duration: Duration,
) -> Result<(), GatewayError>
where
    W: AsyncWriteExt + Unpin,
{
    timeout(timeout_duration, write_message(writer, data))
        .await
        .map_err(|_| GatewayError::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        })?
}

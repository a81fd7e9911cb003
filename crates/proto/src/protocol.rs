//! Length-prefixed postcard framing.
//!
//! Each frame is a little-endian `u32` byte length followed by the postcard encoding of one
//! message. Frames larger than [`MAX_FRAME_LEN`] are rejected on both ends.

use std::io::{Error as IoError, ErrorKind};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single encoded frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encodes `frame` and writes it, flushing afterwards.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidData`] if the frame cannot be encoded or is too large, or the
/// underlying I/O error.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> std::io::Result<()>
where
	W: AsyncWrite + Unpin,
	T: Serialize,
{
	let buf = postcard::to_allocvec(frame).map_err(|e| IoError::new(ErrorKind::InvalidData, e.to_string()))?;
	if buf.len() > MAX_FRAME_LEN {
		return Err(IoError::new(ErrorKind::InvalidData, format!("frame of {} bytes exceeds limit", buf.len())));
	}
	writer.write_u32_le(buf.len() as u32).await?;
	writer.write_all(&buf).await?;
	writer.flush().await
}

/// Reads and decodes one frame.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidData`] for oversized or undecodable frames, or the underlying
/// I/O error (including [`ErrorKind::UnexpectedEof`] for a truncated frame).
pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<Option<T>>
where
	R: AsyncRead + Unpin,
	T: DeserializeOwned,
{
	let len = match reader.read_u32_le().await {
		Ok(len) => len as usize,
		Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e),
	};
	if len > MAX_FRAME_LEN {
		return Err(IoError::new(ErrorKind::InvalidData, format!("frame of {len} bytes exceeds limit")));
	}
	let mut buf = vec![0u8; len];
	reader.read_exact(&mut buf).await?;
	postcard::from_bytes(&buf)
		.map(Some)
		.map_err(|e| IoError::new(ErrorKind::InvalidData, e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{ClientFrame, ClientNotification, Request, RequestId, RequestPayload};
	use crate::{Selection, TextChange};

	#[tokio::test]
	async fn frames_survive_a_duplex_pipe() -> std::io::Result<()> {
		let (mut a, mut b) = tokio::io::duplex(1024);

		write_frame(
			&mut a,
			&ClientFrame::Request(Request {
				id: RequestId(7),
				payload: RequestPayload::CreateBuffer {
					workspace: "ws".into(),
					path: "notes.md".into(),
				},
			}),
		)
		.await?;
		write_frame(
			&mut a,
			&ClientFrame::Notify(ClientNotification::Change {
				workspace: "ws".into(),
				path: "notes.md".into(),
				change: TextChange::insert(0, "🦀"),
			}),
		)
		.await?;
		drop(a);

		let first: Option<ClientFrame> = read_frame(&mut b).await?;
		match first {
			Some(ClientFrame::Request(Request {
				id,
				payload: RequestPayload::CreateBuffer { path, .. },
			})) => {
				assert_eq!(id, RequestId(7));
				assert_eq!(path, "notes.md");
			}
			other => panic!("unexpected frame: {other:?}"),
		}

		let second: Option<ClientFrame> = read_frame(&mut b).await?;
		match second {
			Some(ClientFrame::Notify(ClientNotification::Change { change, .. })) => {
				assert_eq!(change.content, "🦀");
			}
			other => panic!("unexpected frame: {other:?}"),
		}

		let eof: Option<ClientFrame> = read_frame(&mut b).await?;
		assert!(eof.is_none());
		Ok(())
	}

	#[tokio::test]
	async fn oversized_length_prefix_is_rejected() -> std::io::Result<()> {
		let (mut a, mut b) = tokio::io::duplex(64);
		a.write_u32_le(u32::MAX).await?;

		let err = read_frame::<_, ClientFrame>(&mut b).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InvalidData);
		Ok(())
	}

	#[tokio::test]
	async fn truncated_frame_is_an_error() -> std::io::Result<()> {
		let (mut a, mut b) = tokio::io::duplex(64);
		let frame = ClientFrame::Notify(ClientNotification::MoveCursor {
			workspace: "ws".into(),
			sel: Selection::caret(1, 1, "a"),
		});
		let buf = postcard::to_allocvec(&frame).unwrap();
		a.write_u32_le(buf.len() as u32).await?;
		a.write_all(&buf[..buf.len() / 2]).await?;
		drop(a);

		let err = read_frame::<_, ClientFrame>(&mut b).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
		Ok(())
	}
}

//! TCP front end of the server.

use std::sync::Arc;

use tandem_proto::protocol::{read_frame, write_frame};
use tandem_proto::{ClientFrame, ServerFrame};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_service::Service;

use crate::core::ServerCore;
use crate::service::SessionService;

/// Accepts connections on `listener` until `shutdown` is cancelled.
///
/// Cancelling `shutdown` also closes every open connection.
///
/// # Errors
///
/// Returns an error if the listener address cannot be read.
pub async fn serve(listener: TcpListener, core: Arc<ServerCore>, shutdown: CancellationToken) -> std::io::Result<()> {
	let addr = listener.local_addr()?;
	tracing::info!(%addr, "tandem server listening");

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				tracing::info!("tandem server shutting down");
				break;
			}
			res = listener.accept() => {
				match res {
					Ok((stream, peer)) => {
						if let Err(e) = stream.set_nodelay(true) {
							tracing::debug!(%peer, error = %e, "failed to disable nagle");
						}
						tracing::debug!(%peer, "accepted connection");
						tokio::spawn(handle_connection(stream, core.clone(), shutdown.child_token()));
					}
					Err(e) => {
						tracing::error!(error = %e, "failed to accept connection");
					}
				}
			}
		}
	}

	Ok(())
}

/// Serves one client connection until it closes or `shutdown` is cancelled.
pub(crate) async fn handle_connection<S>(stream: S, core: Arc<ServerCore>, shutdown: CancellationToken)
where
	S: AsyncRead + AsyncWrite + Send + 'static,
{
	let (reader, writer) = tokio::io::split(stream);
	let (sink, outbound) = mpsc::unbounded_channel();
	let mut service = SessionService::new(core, sink);
	let session = service.session();
	tracing::info!(session = session.0, "connection opened");

	let writer = tokio::spawn(write_loop(BufWriter::new(writer), outbound, shutdown.clone()));
	let mut reader = BufReader::new(reader);
	loop {
		let frame = tokio::select! {
			_ = shutdown.cancelled() => break,
			frame = read_frame::<_, ClientFrame>(&mut reader) => frame,
		};
		match frame {
			Ok(Some(frame)) => {
				let Ok(()) = std::future::poll_fn(|cx| service.poll_ready(cx)).await;
				let Ok(()) = service.call(frame).await;
			}
			Ok(None) => break,
			Err(e) => {
				tracing::warn!(session = session.0, error = %e, "connection read failed");
				break;
			}
		}
	}

	// Unregistering drops the sink, which ends the writer once it drained.
	drop(service);
	if let Err(e) = writer.await {
		tracing::error!(session = session.0, error = %e, "connection writer panicked");
	}
	tracing::info!(session = session.0, "connection closed");
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<ServerFrame>, shutdown: CancellationToken)
where
	W: AsyncWrite + Unpin,
{
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			frame = outbound.recv() => {
				let Some(frame) = frame else { break };
				if let Err(e) = write_frame(&mut writer, &frame).await {
					tracing::warn!(error = %e, "connection write failed");
					break;
				}
			}
		}
	}
}

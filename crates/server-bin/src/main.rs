//! tandem collaboration server binary.
//!
//! Runs an in-memory [`tandem_server::ServerCore`] behind a TCP listener until interrupted.

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Server command line arguments.
#[derive(Parser, Debug)]
#[command(name = "tandem-server")]
#[command(about = "In-memory tandem collaboration server")]
struct Args {
	/// Address to listen on
	#[arg(short, long, value_name = "ADDR", default_value = "127.0.0.1:50053")]
	listen: SocketAddr,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.finish();

	tracing::subscriber::set_global_default(subscriber)?;

	info!(listen = %args.listen, "Starting tandem-server");
	let listener = TcpListener::bind(args.listen).await?;

	let shutdown = CancellationToken::new();
	let interrupt = shutdown.clone();
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => interrupt.cancel(),
			Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c"),
		}
	});

	tandem_server::serve(listener, tandem_server::ServerCore::new(), shutdown).await?;
	Ok(())
}

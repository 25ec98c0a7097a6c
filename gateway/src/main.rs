//! Thin CLI wrapper around [`gateway_core::Runtime`]: parses flags, installs
//! a plain `tracing_subscriber` (§2 telemetry note — no OpenTelemetry
//! export pipeline), loads configuration from the environment, and runs
//! to completion.

use clap::Parser;
use gateway_core::Runtime;
use gateway_core::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "gateway", about = "Edge API gateway core", version)]
struct Args {
	/// Parse and validate configuration from the environment, then exit
	/// without binding a listener.
	#[arg(long)]
	check_config: bool,
}

fn main() {
	let args = Args::parse();

	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.init();

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("failed to build tokio runtime");

	let code = runtime.block_on(run(args));
	std::process::exit(code);
}

async fn run(args: Args) -> i32 {
	let config = match AppConfig::from_env() {
		Ok(c) => c,
		Err(e) => {
			eprintln!("configuration error: {e:#}");
			return 1;
		},
	};

	if args.check_config {
		println!("configuration is valid");
		return 0;
	}

	let runtime = match Runtime::boot(config).await {
		Ok(r) => r,
		Err(e) => {
			tracing::error!(error = %e, "gateway failed to boot");
			return 1;
		},
	};

	match runtime.serve().await {
		Ok(()) => 0,
		Err(e) => {
			tracing::error!(error = %e, "gateway exited with a fatal error");
			1
		},
	}
}

use clap::Parser;
use std::path::PathBuf;
use imgsrv::config::Config;
use imgsrv::server::ImgsrvServer;

/// imgsrv - image optimizing proxy built with Cloudflare's Pingora
#[derive(Parser, Debug)]
#[command(name = "imgsrv")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to an optional YAML configuration file
    #[arg(short, long, env = "IMGSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Check configuration and codec tools, then exit
    #[arg(long)]
    test: bool,
}

fn main() {
    // Parse command-line arguments
    let args = Args::parse();

    // File (if any) plus IMGSRV_* environment overrides
    let config = Config::load(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::process::exit(1);
    });

    // Initialize logging subsystem
    if let Err(e) = imgsrv::logging::init_subscriber(&config.logging) {
        eprintln!("Failed to initialize logging subsystem: {}", e);
        std::process::exit(1);
    }

    tracing::info!(
        config_file = ?args.config,
        server_address = %config.server.address,
        server_port = config.server.port,
        environment = if config.server.production { "production" } else { "development" },
        "Configuration loaded successfully"
    );

    let server = ImgsrvServer::new(config);
    if let Err(e) = server.prepare() {
        tracing::error!(error = %e, "Startup checks failed");
        std::process::exit(1);
    }

    if args.test {
        tracing::info!("Configuration test successful");
        return;
    }

    // Run server forever (blocks until shutdown)
    if let Err(e) = server.run() {
        tracing::error!(error = %e, "Server failed to start");
        std::process::exit(1);
    }
}

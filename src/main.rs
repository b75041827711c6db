use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use embedcam::session::CameraDirectory;
use embedcam::{
    EmbedcamConfig, EmbeddingBackend, HttpBackend, Member, MockBackend, NotificationBus,
    SessionConsole, SessionOrchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "embedcam")]
#[command(about = "Collect and extract member body embeddings from live cameras")]
#[command(version)]
#[command(long_about = "Opens an embedding session for one member against the access-control \
backend. Cameras can be selected, sample collection started and stopped, extraction triggered \
and followed to completion, and stored embeddings removed, all from the keyboard.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "embedcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Member whose embeddings are managed
    #[arg(
        short,
        long,
        required_unless_present_any = ["print_config", "validate_config", "list_cameras"],
        help = "Identifier of the member to open a session for"
    )]
    member_id: Option<u64>,

    /// Display name for the member
    #[arg(long, help = "Member name shown in the console")]
    member_name: Option<String>,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without opening a session")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Use a scripted in-memory backend instead of the configured server
    #[arg(long, help = "Run against a built-in simulated backend (no server needed)")]
    mock: bool,

    /// List cameras known to the backend and exit
    #[arg(long, help = "Print the backend camera directory and exit")]
    list_cameras: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting embedcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match EmbedcamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match config.validate() {
        Ok(()) if args.validate_config => {
            info!("Configuration validation successful");
            println!("✓ Configuration is valid");
            return Ok(());
        }
        Ok(()) => {}
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }

    let backend: Arc<dyn EmbeddingBackend> = if args.mock {
        info!("Using simulated backend");
        Arc::new(MockBackend::demo())
    } else {
        Arc::new(HttpBackend::new(&config.backend)?)
    };

    if args.list_cameras {
        let cameras = CameraDirectory::fetch(backend.as_ref()).await?;
        if cameras.is_empty() {
            println!("No cameras available");
        }
        for camera in cameras {
            println!("{:>6}  {}", camera.id, camera.name);
        }
        return Ok(());
    }

    let member_id = args
        .member_id
        .ok_or_else(|| anyhow!("--member-id is required to open a session"))?;
    let member = Member::new(member_id, args.member_name.clone().unwrap_or_default());

    let bus = NotificationBus::new(config.notifications.capacity);
    let session = Arc::new(
        SessionOrchestrator::open(member, backend, config.session.clone(), bus).await,
    );
    let console = SessionConsole::new(Arc::clone(&session));

    tokio::select! {
        result = console.run() => {
            if let Err(e) = result {
                error!("Console error: {}", e);
                console.stop();
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted - closing session");
            console.stop();
            session.dispose();
        }
    }

    info!("Session {} closed", session.session_id());
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("embedcam={}", log_level)));

    // Logs go to stderr so they do not interleave with the console view
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Embedcam Configuration File");
    println!("# Every key can also be set through EMBEDCAM_<SECTION>__<KEY> environment variables");
    println!();
    print!("{}", EmbedcamConfig::default().to_toml()?);
    Ok(())
}

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use streamkit::{
    FixedAuthorization, InvertFilter, NullPreviewSink, PassthroughFilter, RecordingStreamer,
    SimulatedProvider, StreamKit, StreamKitConfig,
};
use tokio::time::sleep;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "streamkit")]
#[command(about = "Live capture session front-end between a camera and a push-streaming encoder")]
#[command(version)]
#[command(long_about = "Runs a simulated capture session: preview, optional streaming, a \
mid-run filter swap and a gapless camera switch, driven by the same session state machine an \
embedding application would use against real hardware.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "streamkit.toml", help = "Path to TOML configuration file")]
    config: String,

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
    #[arg(long, help = "Validate configuration file and exit without starting a session")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Also start streaming after the preview is up
    #[arg(long, help = "Start streaming once the preview is running")]
    stream: bool,

    /// Filter to install mid-run (invert, passthrough, none)
    #[arg(long, default_value = "invert", help = "Filter installed mid-run: invert, passthrough, or none")]
    filter: String,

    /// Session duration in seconds (ctrl-c stops earlier)
    #[arg(long, default_value_t = 10, help = "How long to run the session before stopping")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args);

    info!("Starting streamkit v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match StreamKitConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let provider = Arc::new(SimulatedProvider::new());
    let streamer = RecordingStreamer::new();
    let kit = StreamKit::new(
        config,
        provider,
        Arc::new(FixedAuthorization::granted()),
        streamer.clone(),
    )?;

    // Log every session notification as it arrives
    let mut events = kit.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("Notification: {}", event.description());
        }
    });

    kit.start_preview(Arc::new(NullPreviewSink)).await?;
    if args.stream {
        kit.start_streaming().await?;
    }

    let filter: Option<Arc<dyn streamkit::FrameFilter>> = match args.filter.as_str() {
        "invert" => Some(Arc::new(InvertFilter)),
        "passthrough" => Some(Arc::new(PassthroughFilter)),
        "none" => None,
        other => {
            eprintln!("Unknown filter '{}', running without one", other);
            None
        }
    };

    let demo = async {
        sleep(Duration::from_secs(2)).await;
        if let Some(filter) = filter {
            kit.setup_filter(Some(filter)).await?;
        }

        sleep(Duration::from_secs(2)).await;
        if !kit.switch_camera().await? {
            info!("Camera switch refused, staying on the current device");
        }

        if kit.is_torch_supported().await {
            kit.toggle_torch().await?;
        }

        sleep(Duration::from_secs(args.duration.saturating_sub(4))).await;
        Ok::<(), streamkit::StreamKitError>(())
    };

    tokio::select! {
        result = demo => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c, stopping session");
        }
    }

    kit.stop_preview().await?;
    info!(
        "Session finished in state '{}', {} frames pushed to the streamer",
        kit.capture_state_name(),
        streamer.pushed_count()
    );

    Ok(())
}

fn init_logging(args: &Args) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

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
        .unwrap_or_else(|_| EnvFilter::new(format!("streamkit={}", log_level)));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

fn print_default_config() -> Result<()> {
    println!("# streamkit configuration file");
    println!("# Default values for every available option");
    println!();
    print!("{}", toml::to_string_pretty(&StreamKitConfig::default())?);
    Ok(())
}

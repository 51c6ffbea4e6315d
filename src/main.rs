use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use html2img::server::{self, AppState};
use html2img::{
    EvictionSweeper, RenderOrchestrator, Renderer, RendererConfig, ServiceConfig, SessionPool, Validator, Viewport,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::{net::TcpListener, signal};

/// html2img - render HTML fragments to images
#[derive(Parser, Debug)]
#[command(name = "html2img")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Host address to bind the server to
    #[arg(long, short = 'H', default_value = "0.0.0.0", env = "HTML2IMG_HOST")]
    host: String,

    /// Port to listen on
    #[arg(long, short, default_value = "50002", env = "HTML2IMG_PORT")]
    port: u16,

    /// Maximum request body size in bytes
    #[arg(long, default_value = "4194304", env = "HTML2IMG_BODY_LIMIT")]
    body_limit: usize,

    /// Origin prefix images and stylesheets may load from (repeatable)
    #[arg(long = "allow-origin", env = "HTML2IMG_ALLOWED_ORIGINS", value_delimiter = ',')]
    allow_origins: Vec<String>,

    /// Render markup without validating it. Only for trusted callers.
    #[arg(long, env = "HTML2IMG_NO_VALIDATE")]
    no_validate: bool,

    /// Also reject event handlers, embeds and fetching attributes
    #[arg(long, env = "HTML2IMG_STRICT")]
    strict: bool,

    /// Seconds a session may sit idle before it is closed
    #[arg(long, default_value = "300", env = "HTML2IMG_IDLE_TIMEOUT")]
    idle_timeout: u64,

    /// Seconds between eviction sweeps
    #[arg(long, default_value = "30", env = "HTML2IMG_SWEEP_INTERVAL")]
    sweep_interval: u64,

    /// Seconds a single render may take
    #[arg(long, default_value = "30", env = "HTML2IMG_RENDER_TIMEOUT")]
    render_timeout: u64,

    /// Quality for JPEG and WebP output
    #[arg(long, default_value = "80", env = "HTML2IMG_JPEG_QUALITY",
          value_parser = clap::value_parser!(u32).range(1..=100))]
    jpeg_quality: u32,

    /// Browser window width
    #[arg(long, default_value = "1280", env = "HTML2IMG_VIEWPORT_WIDTH")]
    viewport_width: u32,

    /// Browser window height
    #[arg(long, default_value = "720", env = "HTML2IMG_VIEWPORT_HEIGHT")]
    viewport_height: u32,

    /// Run Chrome without its sandbox (needed in some containers)
    #[arg(long, env = "HTML2IMG_NO_SANDBOX")]
    no_sandbox: bool,

    /// Let pages run their own script
    #[arg(long, env = "HTML2IMG_ENABLE_JAVASCRIPT")]
    enable_javascript: bool,

    /// Chrome binary to launch instead of the auto-detected one
    #[arg(long, env = "HTML2IMG_CHROME")]
    chrome: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> ServiceConfig {
        ServiceConfig {
            host: self.host,
            port: self.port,
            body_limit: self.body_limit,
            validate: !self.no_validate,
            allowed_origins: self.allow_origins,
            strict_validation: self.strict,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            sweep_interval: Duration::from_secs(self.sweep_interval),
            render_timeout: Duration::from_secs(self.render_timeout),
            jpeg_quality: self.jpeg_quality,
            renderer: RendererConfig {
                viewport: Viewport {
                    width: self.viewport_width,
                    height: self.viewport_height,
                },
                sandbox: !self.no_sandbox,
                disable_javascript: !self.enable_javascript,
                chrome_path: self.chrome,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("html2img=debug,info")).init();

    let config = cli.into_config();
    config.check()?;
    let validator = config.validator()?;
    match &validator {
        Some(v) => info!(
            "validation enabled ({} allow-listed origin(s), strict: {})",
            v.allow_list().prefixes().len(),
            config.strict_validation
        ),
        None => warn!("markup validation is disabled; every submitted document is rendered"),
    }

    #[cfg(feature = "cdp")]
    let renderer = html2img::cdp::CdpRenderer::launch(&config.renderer).await?;

    #[cfg(not(feature = "cdp"))]
    let renderer = {
        warn!("built without the `cdp` feature; serving placeholder images");
        html2img::NoopRenderer::new()
    };

    serve(config, validator, renderer).await
}

async fn serve<R: Renderer>(config: ServiceConfig, validator: Option<Validator>, renderer: R) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    let pool = SessionPool::new(renderer);
    let sweeper = EvictionSweeper::new(config.sweep_interval, config.idle_timeout).spawn(pool.clone());
    let orchestrator = RenderOrchestrator::new(pool.clone(), config.render_options());
    let app = server::router(AppState::new(orchestrator, validator), config.body_limit);

    info!("listening on {}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.stop().await;
    pool.shutdown().await;
    served?;

    info!("server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

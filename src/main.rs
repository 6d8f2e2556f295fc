use anyhow::Context;
use base64::Engine;
use clap::{Args as ClapArgs, Parser, Subcommand};
use scroll_capture::browser::{ChromeDriver, ConnectionMode, LivePage};
use scroll_capture::capture::CaptureSessions;
use scroll_capture::config::CaptureConfig;
use scroll_capture::page::{PageHost, PageModel};
use scroll_capture::server::{self, ServerState};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use warp::Filter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; missing fields keep their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the capture message channel over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 9669)]
        port: u16,

        #[command(flatten)]
        chrome: ChromeArgs,
    },
    /// Print the detected scroll target of a page
    Detect {
        #[arg(long, conflicts_with = "fixture", required_unless_present = "fixture")]
        url: Option<String>,

        /// JSON page fixture instead of a live page
        #[arg(long)]
        fixture: Option<PathBuf>,

        #[command(flatten)]
        chrome: ChromeArgs,
    },
    /// Capture the full scroll target of a page into a PNG
    Capture {
        #[arg(long)]
        url: String,

        #[arg(short, long, default_value = "capture.png")]
        output: PathBuf,

        #[command(flatten)]
        chrome: ChromeArgs,
    },
}

#[derive(ClapArgs, Debug, Clone)]
struct ChromeArgs {
    /// Chrome executable; auto-detected when absent
    #[arg(long)]
    chrome_path: Option<String>,

    /// Linux sandbox workaround
    #[arg(long)]
    no_sandbox: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Attach to a Chrome already listening on this debug port
    #[arg(long)]
    debug_port: Option<u16>,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 800)]
    height: u32,

    #[arg(long, default_value_t = 1.0)]
    scale: f64,
}

impl ChromeArgs {
    async fn launch(&self) -> anyhow::Result<ChromeDriver> {
        let driver = match (self.debug_port, &self.chrome_path) {
            (Some(port), _) => ChromeDriver::connect_debug_port(port).await?,
            (None, Some(path)) => {
                ChromeDriver::launch_with_path(path.clone(), self.no_sandbox, !self.headed).await?
            }
            (None, None) if !self.headed && !self.no_sandbox => ChromeDriver::launch_auto().await?,
            (None, None) => {
                ChromeDriver::new(ConnectionMode::Sandboxed {
                    chrome_path: None,
                    no_sandbox: self.no_sandbox,
                    headless: !self.headed,
                })
                .await?
            }
        };
        driver
            .set_viewport(self.width, self.height, self.scale)
            .await
            .context("Failed to set viewport")?;
        Ok(driver)
    }
}

#[derive(Debug, serde::Deserialize)]
struct NavigateRequest {
    url: String,
}

#[derive(Debug, serde::Deserialize)]
struct CaptureRequest {
    url: Option<String>,
}

struct AppState {
    driver: Mutex<ChromeDriver>,
    server: Arc<ServerState<LivePage>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CaptureConfig::from_file(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CaptureConfig::default(),
    };

    match args.command {
        Command::Serve { port, chrome } => serve(port, &chrome, config).await,
        Command::Detect {
            url,
            fixture,
            chrome,
        } => match (url, fixture) {
            (_, Some(fixture)) => detect_fixture(&fixture, &config).await,
            (Some(url), None) => detect_live(&url, &chrome, &config).await,
            (None, None) => anyhow::bail!("Either --url or --fixture is required"),
        },
        Command::Capture {
            url,
            output,
            chrome,
        } => capture(&url, &output, &chrome, &config).await,
    }
}

async fn print_detection<H: PageHost>(host: Arc<H>, config: &CaptureConfig) -> anyhow::Result<()> {
    let sessions = CaptureSessions::new(host, config)?;
    let reply = sessions.init_capture_context(&serde_json::json!({})).await;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn detect_fixture(path: &Path, config: &CaptureConfig) -> anyhow::Result<()> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;
    let page = PageModel::from_fixture_json(&json)?;
    print_detection(Arc::new(page), config).await
}

async fn detect_live(url: &str, chrome: &ChromeArgs, config: &CaptureConfig) -> anyhow::Result<()> {
    let driver = chrome.launch().await?;
    driver.navigate(url).await?;
    let host = Arc::new(driver.live_page().await?);
    let result = print_detection(host, config).await;
    driver.close().await?;
    result
}

async fn capture(
    url: &str,
    output: &Path,
    chrome: &ChromeArgs,
    config: &CaptureConfig,
) -> anyhow::Result<()> {
    let driver = chrome.launch().await?;
    driver.navigate(url).await?;
    let outcome = driver.capture_scroll_target(config).await;
    driver.close().await?;

    let outcome = outcome?;
    outcome.image.save(output).await?;
    println!(
        "{} tile(s) of {} -> {} ({}x{})",
        outcome.tiles,
        outcome.target.description,
        output.display(),
        outcome.image.width,
        outcome.image.height
    );
    Ok(())
}

async fn serve(port: u16, chrome: &ChromeArgs, config: CaptureConfig) -> anyhow::Result<()> {
    log::info!("Starting scroll-capture on port {}", port);

    let driver = chrome.launch().await?;
    let host = Arc::new(driver.live_page().await?);
    let server_state = Arc::new(ServerState::new(host, config)?);
    let state = Arc::new(AppState {
        driver: Mutex::new(driver),
        server: server_state.clone(),
    });

    let state_filter = warp::any().map(move || state.clone());

    let navigate = warp::path("navigate")
        .and(warp::post())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_navigate);

    let capture = warp::path("capture")
        .and(warp::post())
        .and(warp::body::json())
        .and(state_filter)
        .and_then(handle_capture);

    let routes = server::health()
        .or(server::message(server_state))
        .or(navigate)
        .or(capture);

    // Bind manually to report "port in use" clearly
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Port {} is already in use or unavailable", port))?;

    log::info!("Listening on http://{}", addr);
    warp::serve(routes)
        .run_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
        .await;
    Ok(())
}

fn error_reply(message: String) -> warp::reply::Json {
    warp::reply::json(&serde_json::json!({ "status": "error", "message": message }))
}

async fn handle_navigate(
    req: NavigateRequest,
    state: Arc<AppState>,
) -> Result<warp::reply::Json, warp::Rejection> {
    log::info!("Navigate request: {}", req.url);

    let driver = state.driver.lock().await;
    if let Err(e) = driver.navigate(&req.url).await {
        log::error!("Navigation failed: {}", e);
        return Ok(error_reply(e.to_string()));
    }
    let reset = match driver.live_page().await {
        Ok(page) => state.server.reset(Arc::new(page)).await,
        Err(e) => Err(e),
    };
    if let Err(e) = reset {
        return Ok(error_reply(format!("Failed to rebind page: {}", e)));
    }

    let title = driver.title().await.unwrap_or_default();
    Ok(warp::reply::json(&serde_json::json!({
        "status": "success",
        "url": req.url,
        "title": title,
    })))
}

async fn handle_capture(
    req: CaptureRequest,
    state: Arc<AppState>,
) -> Result<warp::reply::Json, warp::Rejection> {
    let driver = state.driver.lock().await;
    if let Some(url) = &req.url {
        if let Err(e) = driver.navigate(url).await {
            return Ok(error_reply(e.to_string()));
        }
        let rebound = match driver.live_page().await {
            Ok(page) => state.server.reset(Arc::new(page)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = rebound {
            return Ok(error_reply(format!("Failed to rebind page: {}", e)));
        }
    }

    match driver.capture_scroll_target(state.server.config()).await {
        Ok(outcome) => Ok(warp::reply::json(&serde_json::json!({
            "status": "success",
            "target": outcome.target,
            "tiles": outcome.tiles,
            "width": outcome.image.width,
            "height": outcome.image.height,
            "sha256": outcome.image.sha256,
            "png": base64::engine::general_purpose::STANDARD.encode(&outcome.image.png),
        }))),
        Err(e) => {
            log::error!("Capture failed: {}", e);
            Ok(error_reply(e.to_string()))
        }
    }
}

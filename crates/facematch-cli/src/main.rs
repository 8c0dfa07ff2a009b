use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_hw::{frame, Camera, CaptureSession, SessionConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[zbus::proxy(
    interface = "org.facematch.Service1",
    default_service = "org.facematch.Service1",
    default_path = "/org/facematch/Service1"
)]
trait FaceMatch {
    fn register(&self, name: &str) -> zbus::Result<String>;
    fn recognize(&self) -> zbus::Result<String>;
    fn stop_camera(&self) -> zbus::Result<bool>;
    fn list_faces(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facematch", about = "Face registration and recognition CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a frame and register the face in it
    Register {
        /// Name to store with the face
        #[arg(short, long)]
        name: String,
    },
    /// Capture a frame and identify the face in it
    Recognize,
    /// List registered faces
    List,
    /// Show daemon status
    Status,
    /// Release the daemon's camera
    StopCamera,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// V4L2 device to capture from
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Save the captured frame as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register { name } => {
            let proxy = connect(cli.system).await?;
            let reply = proxy.register(&name).await.context("Register call failed")?;
            Ok(report(&reply))
        }
        Commands::Recognize => {
            let proxy = connect(cli.system).await?;
            let reply = proxy.recognize().await.context("Recognize call failed")?;
            Ok(report(&reply))
        }
        Commands::List => {
            let proxy = connect(cli.system).await?;
            let reply = proxy.list_faces().await.context("ListFaces call failed")?;
            let names: Vec<String> =
                serde_json::from_str(&reply).context("daemon returned malformed face list")?;
            print!("{}", format_names(&names));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let proxy = connect(cli.system).await?;
            let reply = proxy.status().await.context("Status call failed")?;
            let value: serde_json::Value =
                serde_json::from_str(&reply).context("daemon returned malformed status")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::StopCamera => {
            let proxy = connect(cli.system).await?;
            if proxy.stop_camera().await.context("StopCamera call failed")? {
                println!("Camera released");
            } else {
                println!("Camera was not open");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Test { device, output } => {
            camera_test(device, output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn connect(system: bool) -> Result<FaceMatchProxy<'static>> {
    let use_system = system
        || std::env::var("FACEMATCH_BUS")
            .map(|v| v.eq_ignore_ascii_case("system"))
            .unwrap_or(false);
    let connection = if use_system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;

    FaceMatchProxy::new(&connection)
        .await
        .context("facematchd is not reachable; is the daemon running?")
}

/// Print a verdict response and map `success` to the exit code.
fn report(reply: &str) -> ExitCode {
    let (line, success) = describe(reply);
    println!("{line}");
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn describe(reply: &str) -> (String, bool) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(reply) else {
        return (format!("Unexpected reply: {reply}"), false);
    };
    let success = value["success"].as_bool().unwrap_or(false);
    let message = value["message"].as_str().map(str::to_string);

    let line = match (value["name"].as_str(), value["confidence"].as_f64()) {
        (Some(name), Some(confidence)) => {
            format!("Recognized: {name} (confidence {:.1}%)", confidence * 100.0)
        }
        _ => message.unwrap_or_else(|| reply.to_string()),
    };
    (line, success)
}

fn format_names(names: &[String]) -> String {
    if names.is_empty() {
        return "No faces registered\n".to_string();
    }
    let mut out = format!("{} registered face(s):\n", names.len());
    for name in names {
        out.push_str(&format!("  {name}\n"));
    }
    out
}

fn camera_test(device: String, output: Option<PathBuf>) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for info in &devices {
        println!("  {}  {} ({}, {})", info.path, info.name, info.driver, info.bus);
    }

    let mut session = CaptureSession::new(SessionConfig {
        device: device.clone(),
        init_delay: Duration::from_millis(500),
        mirror: true,
    });
    let camera = session
        .open()
        .with_context(|| format!("failed to open {device}"))?;
    println!(
        "Opened {device}: {}x{} {:?}",
        camera.width,
        camera.height,
        camera.pixel_format()
    );

    let image = session.capture().context("frame capture failed")?;
    let brightness = frame::mean_brightness(&image);
    println!(
        "Captured {}x{} frame, mean brightness {brightness:.1}",
        image.width(),
        image.height()
    );

    if let Some(path) = output {
        image
            .save(&path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("Saved frame to {}", path.display());
    }

    session.release();
    Ok(())
}

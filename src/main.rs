// src/main.rs
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::camera::{self, Facing, StreamRequest};
use crate::controller::Controller;
use crate::predict::remote_model::RemoteModel;

mod capture;
mod config;
mod controller;
mod gui;
mod predict;

#[derive(Parser)]
#[command(name = "fruitsnap")]
#[command(about = "Classify fruit photos with a remote prediction service", long_about = None)]
struct Cli {
    /// Prediction backend base URL (default: $FRUITSNAP_BACKEND_URL or http://localhost:5000)
    #[arg(long, global = true)]
    backend_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict the fruit in an image file
    Predict {
        /// Image file to upload
        path: PathBuf,
    },
    /// Take a photo with the camera and predict it
    Capture {
        /// Camera index (see list-cameras); default prefers a rear-facing camera
        #[arg(long, short = 'd')]
        device: Option<usize>,

        /// Prefer a front-facing camera
        #[arg(long)]
        front: bool,

        /// Save the photo that was sent
        #[arg(long)]
        save: Option<PathBuf>,

        /// Seconds to wait for the camera to deliver a frame
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// List available cameras
    ListCameras,
    /// Check that the prediction backend is up
    CheckBackend,
    /// Run graphical user interface
    Gui {
        /// Camera index used by the camera panel
        #[arg(long, short = 'd')]
        device: Option<usize>,

        /// Prefer a front-facing camera
        #[arg(long)]
        front: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or("RUST_LOG", "info")
    );

    let cli = Cli::parse();
    let backend_url = config::backend_url(cli.backend_url);

    match cli.command {
        Commands::Predict { path } => {
            run_predict(&backend_url, path)
        }
        Commands::Capture { device, front, save, wait } => {
            run_capture(&backend_url, stream_request(device, front), save, Duration::from_secs(wait))
        }
        Commands::ListCameras => {
            list_cameras()
        }
        Commands::CheckBackend => {
            check_backend(&backend_url)
        }
        Commands::Gui { device, front } => {
            gui::run_gui(backend_url, stream_request(device, front))
        }
    }
}

fn stream_request(device: Option<usize>, front: bool) -> StreamRequest {
    StreamRequest {
        facing: if front { Facing::User } else { Facing::Environment },
        device,
    }
}

fn new_controller(backend_url: &str, request: StreamRequest) -> Result<Controller> {
    let model = Arc::new(RemoteModel::new(backend_url)?);
    Ok(Controller::new(model, camera::default_backend()).with_stream_request(request))
}

//Print the outcome left in the controller; an error outcome becomes the command's error
fn report(controller: &Controller) -> Result<()> {
    let snap = controller.snapshot();
    if let Some(message) = snap.error {
        return Err(anyhow!(message));
    }
    let result = snap
        .result
        .ok_or_else(|| anyhow!("No prediction was made"))?;

    println!("\n=== Prediction ===");
    println!("Fruit:      {}", result.predicted_class);
    println!("Confidence: {}", result.confidence_label());
    if let Some(classes) = result.class_list() {
        println!("Classes:    {}", classes);
    }
    println!("==================\n");
    Ok(())
}

fn run_predict(backend_url: &str, path: PathBuf) -> Result<()> {
    info!("Predicting {}", path.display());
    let controller = new_controller(backend_url, StreamRequest::default())?;
    controller.select_path(&path)?;

    if let Some(worker) = controller.submit_upload() {
        worker
            .join()
            .map_err(|_| anyhow!("Prediction worker panicked"))?;
    }
    report(&controller)
}

fn run_capture(backend_url: &str, request: StreamRequest, save: Option<PathBuf>, wait: Duration) -> Result<()> {
    info!("Starting headless camera capture");
    let mut controller = new_controller(backend_url, request)?;

    controller.activate_camera();
    if let Err(e) = controller.wait_for_camera(wait) {
        // The controller's own message is more specific when acquisition failed
        let message = controller.snapshot().error.unwrap_or_else(|| e.to_string());
        controller.deactivate_camera();
        return Err(anyhow!(message));
    }

    let worker = controller.capture_and_submit();
    // The frame is already encoded; the device is no longer needed
    controller.deactivate_camera();

    if let (Some(path), Some(photo)) = (&save, controller.captured_photo()) {
        std::fs::write(path, photo.bytes())?;
        info!("Photo saved to: {}", path.display());
    }

    if let Some(worker) = worker {
        worker
            .join()
            .map_err(|_| anyhow!("Prediction worker panicked"))?;
    }
    report(&controller)
}

fn list_cameras() -> Result<()> {
    info!("Listing available cameras...");

    match camera::default_backend().list_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("\nNo cameras found\n");
        }
        Ok(devices) => {
            println!("\nAvailable cameras:");
            for (i, name) in devices.iter().enumerate() {
                println!("  {}. {}", i, name);
            }
            println!();
        }
        Err(e) => {
            error!("Failed to list cameras: {}", e);
        }
    }

    Ok(())
}

fn check_backend(backend_url: &str) -> Result<()> {
    info!("Checking backend status at {}...", backend_url);
    let model = RemoteModel::new(backend_url)?;

    match model.check_health() {
        Ok(status) => {
            println!("✓ Backend is running at {} (status: {})", model.base_url(), status);
        }
        Err(e) => {
            println!("✗ Could not reach backend at {}", model.base_url());
            println!("  Error: {}", e);
            println!("\nTroubleshooting:");
            println!("  1. Start the prediction server");
            println!("  2. Point fruitsnap at it: --backend-url or {}", config::BACKEND_URL_ENV);
        }
    }

    Ok(())
}

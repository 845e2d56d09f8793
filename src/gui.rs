// src/gui.rs
use anyhow::Result;
use chrono::Datelike;
use eframe::egui;
use egui::{Color32, RichText, ScrollArea, Stroke, Ui, Vec2};
use log::{error, info};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::capture::camera::{self, StreamRequest};
use crate::capture::source::IMAGE_EXTENSIONS;
use crate::controller::{CameraStatus, Controller, Snapshot};
use crate::predict::remote_model::RemoteModel;

const CONTROLS_WIDTH: f32 = 380.0;
const DEFAULT_WINDOW_WIDTH: f32 = 980.0;
const DEFAULT_WINDOW_HEIGHT: f32 = 700.0;
const CAMERA_VIEW_HEIGHT: f32 = 240.0;
const ACCENT: Color32 = Color32::from_rgb(42, 90, 170);
const DANGER: Color32 = Color32::from_rgb(170, 50, 50);
const CARD_FILL: Color32 = Color32::from_rgb(35, 35, 35);

//Result of the startup health check against the backend
#[derive(Clone)]
enum BackendStatus {
    Checking,
    Up(String),
    Down(String),
}

pub struct FruitSnapApp {
    controller: Controller,
    backend_url: String,
    backend_status: Arc<Mutex<BackendStatus>>,
    was_style_initialized: bool,
    preview_texture: Option<(u64, egui::TextureHandle)>,
    camera_texture: Option<(u64, egui::TextureHandle)>,
}

impl FruitSnapApp {
    fn new(model: Arc<RemoteModel>, stream_request: StreamRequest) -> Self {
        let backend_url = model.base_url().to_string();
        let backend_status = Arc::new(Mutex::new(BackendStatus::Checking));

        let status_clone = Arc::clone(&backend_status);
        let model_clone = Arc::clone(&model);
        thread::spawn(move || {
            let status = match model_clone.check_health() {
                Ok(status) => BackendStatus::Up(status),
                Err(e) => {
                    error!("Backend health check failed: {}", e);
                    BackendStatus::Down(e.to_string())
                }
            };
            if let Ok(mut guard) = status_clone.lock() {
                *guard = status;
            }
        });

        let controller = Controller::new(model, camera::default_backend()).with_stream_request(stream_request);

        Self {
            controller,
            backend_url,
            backend_status,
            was_style_initialized: false,
            preview_texture: None,
            camera_texture: None,
        }
    }

    fn init_style(&mut self, ctx: &egui::Context) {
        let mut style = (*ctx.style()).clone();
        style.visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(30, 30, 30);
        style.visuals.widgets.inactive.bg_fill = Color32::from_rgb(45, 45, 45);
        style.visuals.widgets.hovered.bg_fill = Color32::from_rgb(55, 55, 55);
        style.visuals.widgets.active.bg_fill = Color32::from_rgb(65, 65, 65);
        style.visuals.widgets.inactive.rounding = egui::Rounding::same(6.0);
        style.visuals.widgets.hovered.rounding = egui::Rounding::same(6.0);
        style.visuals.widgets.active.rounding = egui::Rounding::same(6.0);
        style.visuals.selection.bg_fill = ACCENT;
        style.text_styles.insert(
            egui::TextStyle::Body,
            egui::FontId::new(15.0, egui::FontFamily::Proportional),
        );
        style.text_styles.insert(
            egui::TextStyle::Button,
            egui::FontId::new(15.0, egui::FontFamily::Proportional),
        );
        style.text_styles.insert(
            egui::TextStyle::Heading,
            egui::FontId::new(22.0, egui::FontFamily::Proportional),
        );
        ctx.set_style(style);
        self.was_style_initialized = true;
    }

    fn card<R>(ui: &mut Ui, fill: Color32, add_contents: impl FnOnce(&mut Ui) -> R) -> R {
        egui::Frame::none()
            .fill(fill)
            .rounding(8.0)
            .stroke(Stroke::new(1.0, Color32::from_rgb(60, 60, 60)))
            .inner_margin(12.0)
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                add_contents(ui)
            })
            .inner
    }

    fn draw_upload_card(&mut self, ui: &mut Ui, snap: &Snapshot) {
        Self::card(ui, CARD_FILL, |ui| {
            ui.heading(RichText::new("Upload Image").size(18.0));
            ui.label(RichText::new("Pick a fruit photo from your files.").weak());
            ui.add_space(6.0);

            ui.horizontal(|ui| {
                if ui.button("📂 Choose image...").clicked() {
                    match rfd::FileDialog::new()
                        .add_filter("Images", IMAGE_EXTENSIONS)
                        .pick_file()
                    {
                        Some(path) => {
                            if let Err(e) = self.controller.select_path(&path) {
                                error!("Failed to load {}: {:#}", path.display(), e);
                            }
                        }
                        None => self.controller.select_file(None),
                    }
                }
                let name = snap.source_name.as_deref().unwrap_or("No file chosen");
                ui.label(RichText::new(name).italics());
            });
            ui.add_space(6.0);

            let label = if snap.busy && !snap.using_camera_photo {
                "Predicting..."
            } else {
                "Predict from Upload"
            };
            let button = egui::Button::new(RichText::new(label).size(14.0).color(Color32::WHITE))
                .fill(ACCENT)
                .rounding(6.0);
            if ui
                .add_enabled(!snap.busy, button)
                .clicked()
            {
                self.controller.submit_upload();
            }
        });
    }

    fn draw_camera_card(&mut self, ui: &mut Ui, ctx: &egui::Context, snap: &Snapshot) {
        Self::card(ui, CARD_FILL, |ui| {
            ui.heading(RichText::new("Camera").size(18.0));
            ui.label(RichText::new("Turn on the camera, point it at a fruit, then take a photo.").weak());
            ui.add_space(6.0);

            ui.horizontal(|ui| {
                let camera_on = snap.camera != CameraStatus::Inactive;
                let (toggle_label, toggle_fill) = if camera_on {
                    ("Turn Camera Off", DANGER)
                } else {
                    ("Turn Camera On", Color32::from_rgb(45, 45, 45))
                };
                if ui
                    .add(egui::Button::new(toggle_label).fill(toggle_fill).rounding(6.0))
                    .clicked()
                {
                    self.controller.toggle_camera();
                }

                let capture_label = if snap.busy && snap.using_camera_photo {
                    "Predicting..."
                } else {
                    "📷 Take Photo & Predict"
                };
                let capture = egui::Button::new(RichText::new(capture_label).color(Color32::WHITE))
                    .fill(ACCENT)
                    .rounding(6.0);
                if ui.add_enabled(snap.can_capture(), capture).clicked() {
                    self.controller.capture_and_submit();
                }
            });
            ui.add_space(8.0);

            if snap.camera_active() {
                self.draw_live_view(ui, ctx);
                if !snap.camera_ready() {
                    ui.label(RichText::new("Preparing camera... wait a moment before taking a photo.").weak());
                }
            } else {
                self.camera_texture = None;
                let text = if snap.camera == CameraStatus::Requesting {
                    "Requesting camera access..."
                } else {
                    "Camera is off. Click \"Turn Camera On\" and allow camera access."
                };
                ui.label(RichText::new(text).weak());
            }
        });
    }

    fn draw_live_view(&mut self, ui: &mut Ui, ctx: &egui::Context) {
        if let Some((sequence, frame)) = self.controller.live_frame() {
            let stale = self.camera_texture.as_ref().map_or(true, |(seen, _)| *seen != sequence);
            if stale && frame.width() > 0 && frame.height() > 0 {
                let image = egui::ColorImage::from_rgb(
                    [frame.width() as usize, frame.height() as usize],
                    frame.as_raw(),
                );
                let texture = ctx.load_texture("camera_texture", image, egui::TextureOptions::LINEAR);
                self.camera_texture = Some((sequence, texture));
            }
        }
        if let Some((_, texture)) = &self.camera_texture {
            ui.image((texture.id(), fit_size(texture.size_vec2(), ui.available_width(), CAMERA_VIEW_HEIGHT)));
        }
        //Keep pulling frames while the camera is on
        ctx.request_repaint_after(Duration::from_millis(33));
    }

    fn draw_preview_card(&mut self, ui: &mut Ui, ctx: &egui::Context, snap: &Snapshot) {
        Self::card(ui, CARD_FILL, |ui| {
            ui.heading(RichText::new("Preview").size(18.0));
            ui.add_space(6.0);

            let Some(preview) = &snap.preview else {
                self.preview_texture = None;
                ui.label(RichText::new("No image yet. Upload a file or take a photo with the camera.").weak());
                return;
            };

            let stale = self
                .preview_texture
                .as_ref()
                .map_or(true, |(revision, _)| *revision != preview.revision);
            if stale {
                self.preview_texture = preview.image.as_ref().map(|image| {
                    let rgba = image.to_rgba8();
                    let color_image = egui::ColorImage::from_rgba_unmultiplied(
                        [rgba.width() as usize, rgba.height() as usize],
                        rgba.as_flat_samples().as_slice(),
                    );
                    let texture = ctx.load_texture("preview_texture", color_image, egui::TextureOptions::LINEAR);
                    (preview.revision, texture)
                });
            }

            match &self.preview_texture {
                Some((_, texture)) => {
                    ui.image((texture.id(), fit_size(texture.size_vec2(), ui.available_width(), 360.0)));
                }
                None => {
                    ui.label(format!("{} cannot be previewed.", preview.label));
                }
            }
        });
    }

    fn draw_outcome(&self, ui: &mut Ui, snap: &Snapshot) {
        if let Some(message) = &snap.error {
            ui.add_space(8.0);
            Self::card(ui, Color32::from_rgb(70, 30, 30), |ui| {
                ui.heading(RichText::new("Error").size(18.0).color(Color32::from_rgb(255, 170, 170)));
                ui.label(message);
            });
        }

        if let Some(result) = &snap.result {
            ui.add_space(8.0);
            Self::card(ui, Color32::from_rgb(28, 52, 36), |ui| {
                ui.heading(RichText::new("Prediction").size(18.0));
                ui.add_space(4.0);
                ui.horizontal(|ui| {
                    ui.label(RichText::new("Fruit:").strong());
                    ui.label(RichText::new(&result.predicted_class).size(20.0).color(Color32::WHITE));
                });
                ui.horizontal(|ui| {
                    ui.label(RichText::new("Confidence:").strong());
                    ui.label(result.confidence_label());
                });
                if let Some(classes) = result.class_list() {
                    ui.horizontal_wrapped(|ui| {
                        ui.label(RichText::new("Known classes:").strong());
                        ui.label(classes);
                    });
                }
                if let Some(at) = snap.result_at {
                    ui.label(RichText::new(at.format("%H:%M:%S").to_string()).small().weak());
                }
            });
        }
    }

    fn draw_footer(&self, ui: &mut Ui) {
        ui.horizontal(|ui| {
            ui.label(RichText::new(format!("© {} Fruit Classifier", chrono::Local::now().year())).small());
            ui.separator();
            let status = self
                .backend_status
                .lock()
                .map(|s| s.clone())
                .unwrap_or(BackendStatus::Checking);
            let (text, color) = match status {
                BackendStatus::Checking => (format!("Checking {}...", self.backend_url), Color32::GRAY),
                BackendStatus::Up(s) => (format!("Backend {} ({})", self.backend_url, s), Color32::from_rgb(120, 200, 120)),
                BackendStatus::Down(_) => (format!("Backend {} unreachable", self.backend_url), Color32::from_rgb(220, 120, 120)),
            };
            ui.label(RichText::new(text).small().color(color));
        });
    }
}

//Scale an image to fit inside max_width x max_height, keeping its aspect ratio
fn fit_size(size: Vec2, max_width: f32, max_height: f32) -> Vec2 {
    if size.x <= 0.0 || size.y <= 0.0 {
        return Vec2::ZERO;
    }
    let scale = (max_width / size.x).min(max_height / size.y).min(1.0);
    size * scale
}

impl eframe::App for FruitSnapApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.was_style_initialized {
            self.init_style(ctx);
        }

        let snap = self.controller.snapshot();
        if snap.busy || snap.camera == CameraStatus::Requesting {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.add_space(6.0);
            ui.heading(RichText::new("Fruit Image Classifier").size(24.0));
            ui.label("Upload a fruit photo or use the camera to find out which fruit it is.");
            ui.add_space(6.0);
        });

        egui::TopBottomPanel::bottom("footer").show(ctx, |ui| {
            self.draw_footer(ui);
        });

        egui::SidePanel::left("controls")
            .exact_width(CONTROLS_WIDTH)
            .show(ctx, |ui| {
                ScrollArea::vertical().show(ui, |ui| {
                    ui.add_space(8.0);
                    self.draw_upload_card(ui, &snap);
                    ui.add_space(8.0);
                    self.draw_camera_card(ui, ctx, &snap);
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ScrollArea::vertical().show(ui, |ui| {
                ui.add_space(8.0);
                self.draw_preview_card(ui, ctx, &snap);
                self.draw_outcome(ui, &snap);
            });
        });
    }

    fn on_close_event(&mut self) -> bool {
        info!("Window closing, releasing camera");
        self.controller.deactivate_camera();
        true
    }
}

pub fn run_gui(backend_url: String, stream_request: StreamRequest) -> Result<()> {
    info!("Fruit classifier GUI starting up...");

    let model = Arc::new(RemoteModel::new(&backend_url)?);

    let native_options = eframe::NativeOptions {
        initial_window_size: Some(egui::vec2(DEFAULT_WINDOW_WIDTH, DEFAULT_WINDOW_HEIGHT)),
        min_window_size: Some(egui::vec2(CONTROLS_WIDTH + 300.0, 480.0)),
        ..eframe::NativeOptions::default()
    };

    eframe::run_native(
        "Fruit Image Classifier",
        native_options,
        Box::new(move |_cc| Box::new(FruitSnapApp::new(model, stream_request))),
    )
    .map_err(|e| anyhow::anyhow!("Failed to start GUI: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::fit_size;
    use egui::Vec2;

    #[test]
    fn fit_size_keeps_aspect_and_never_upscales() {
        assert_eq!(fit_size(Vec2::new(800.0, 400.0), 400.0, 400.0), Vec2::new(400.0, 200.0));
        assert_eq!(fit_size(Vec2::new(100.0, 50.0), 400.0, 400.0), Vec2::new(100.0, 50.0));
        assert_eq!(fit_size(Vec2::new(100.0, 400.0), 400.0, 200.0), Vec2::new(50.0, 200.0));
        assert_eq!(fit_size(Vec2::ZERO, 400.0, 400.0), Vec2::ZERO);
    }
}

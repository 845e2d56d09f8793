// src/capture/mod.rs
pub mod camera;
pub mod source;

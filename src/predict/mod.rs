// src/predict/mod.rs
pub mod connector;
pub mod remote_model;
pub mod types;

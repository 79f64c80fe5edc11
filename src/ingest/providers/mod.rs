// src/ingest/providers/mod.rs
pub mod dacon;
pub mod kaggle;

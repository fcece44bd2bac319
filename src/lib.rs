//! Extract configuration records from two contract versions with a language
//! model, pair them by key and explain how each pair differs.
//!
//! [`engine::Engine::run_analysis`] is the entry point; [`service`] holds the
//! model-backed collaborators it drives.

pub mod compare;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod pool;
pub mod record;
pub mod service;
pub mod settings;

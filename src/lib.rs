//! moodlenav library
//!
//! Course list caching for a Moodle portal: course sources (AJAX API or HTML
//! scraping), a TTL cache in a persistent key-value store, session detection,
//! semester selection and user preferences.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod prefs;
pub mod semester;
pub mod session;

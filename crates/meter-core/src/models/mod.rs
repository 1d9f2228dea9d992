//! Data models: configuration and the field extraction data model.

pub mod config;
pub mod fields;

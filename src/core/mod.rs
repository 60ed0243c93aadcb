//! Core business logic module

pub mod connector;
pub mod error;
pub mod events;
pub mod scanner;
pub mod service;
pub mod types;

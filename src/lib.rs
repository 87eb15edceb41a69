//! Vendora backend: purchase and wallet transaction engine for prepaid
//! digital goods (data, airtime, cable, electricity), paid from a prepaid
//! wallet and fulfilled through interchangeable vendor APIs.

pub mod api;
#[cfg(feature = "cache")]
pub mod cache;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod model;
pub mod notifications;
pub mod vendors;

//! Clubgate - Request Admission Control
//!
//! This crate implements the admission control layer that sits in front of
//! the club management API. Every request is counted against a fixed-window
//! policy chosen by route; abusive clients get a 429, and any internal fault
//! in the layer lets traffic through rather than blocking it.

pub mod config;
pub mod error;
pub mod web;
pub mod ratelimit;

//! rfpscout - procurement portal scanning and RFP discovery system.
//!
//! Watches configured procurement portals for new RFP listings, keeps
//! observable scan sessions with live event streams, schedules recurring
//! scans without overlap, and drives durable multi-phase workflows from
//! discovery through submission.

pub mod cli;
pub mod config;
pub mod models;
pub mod repository;
pub mod scan;
pub mod server;
pub mod workflow;

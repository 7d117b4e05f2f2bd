//! Thin octocrab wrapper for the repository endpoints this tool touches.

pub mod client;
pub mod types;

pub use client::GitHubClient;

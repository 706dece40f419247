//! Client for the registry v2 HTTP API

mod auth;
mod client;

pub use client::Client;

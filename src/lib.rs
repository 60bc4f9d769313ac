pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fal;
pub mod models;
pub mod web;
pub mod workflow;

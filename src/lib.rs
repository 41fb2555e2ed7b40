#![allow(async_fn_in_trait)]
pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod lifecycle;
pub mod orchestrator;
pub mod order;
pub mod planet;
pub mod search;
pub mod summary;
pub mod window;

#[cfg(test)]
mod testing;

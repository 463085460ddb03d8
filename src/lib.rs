#![forbid(unsafe_code)]

pub mod adapter;
pub mod antibot;
pub mod book;
pub mod classify;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod dispatch;
pub mod encoding;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod history;
pub mod logging;
pub mod ordinal;
pub mod postprocess;
pub mod traverse;

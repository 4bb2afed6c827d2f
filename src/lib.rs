pub mod args;
pub mod config;
pub mod database;
pub mod error;
pub mod fasta;
pub mod pipeline;
pub mod rewrite;
pub mod run;
pub mod server;
pub mod utils;

pub mod classify;
pub mod config;
pub mod db;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod source;

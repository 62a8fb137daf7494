pub mod config;
pub mod position;
pub mod replay;

pub mod logger;
pub mod sleep;
pub mod error;
pub mod types;
pub mod config;
pub mod platform;
pub mod supervisor;
pub mod chain;
pub mod runner;
pub mod pixel;
pub mod clipboard;
pub mod completion;
pub mod intent;
pub mod chat;
pub mod orchestrator;

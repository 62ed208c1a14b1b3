pub mod clock;
pub mod color;
pub mod error;
pub mod logger;
pub mod machine;
pub mod monitor;
pub mod notify;
pub mod platform;
pub mod remote;
pub mod settings;
pub mod similarity;
pub mod state;
pub mod types;
pub mod watchdog;

#[cfg(test)]
mod testing;

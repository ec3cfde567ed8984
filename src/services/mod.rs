pub mod ai;
pub mod analysis;
pub mod booking;
pub mod calendar;
pub mod config_resolver;
pub mod knowledge;
pub mod session;
pub mod transfer;
pub mod transport;
pub mod usage;
pub mod webhook;

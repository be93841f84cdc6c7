pub mod client;
pub mod domain;
pub mod gps;
pub mod ports;
pub mod queue;
pub mod reporter;
pub mod sync;

// Library surface for the host binary and integration tests.
pub mod app_dirs;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod oled;
pub mod protocol;
pub mod rfid;
pub mod runtime;
pub mod session;
pub mod stats;
pub mod transport;
pub mod util;
pub mod workout;

pub mod clock;
pub mod config;
pub mod controller;
pub mod failover;
pub mod output;
pub mod prefs;
pub mod signals;
pub mod stream;
pub mod timers;
pub mod watchdog;

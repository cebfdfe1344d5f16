// Object reconciliation
pub mod run;

// Settings inspection
pub mod config;

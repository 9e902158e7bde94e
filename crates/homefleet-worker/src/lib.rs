// Worker runtime for the automation subsystem

pub mod classify;
pub mod inventory;
pub mod runner;
pub mod stream;
pub mod worker;

pub use worker::Worker;

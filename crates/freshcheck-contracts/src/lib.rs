//! Data model and pure logic shared by the FreshCheck engine and CLI.

pub mod analysis;
pub mod capture;
pub mod events;
pub mod history;
pub mod presenter;
pub mod session;

pub mod aggregate;
pub mod catalog;
pub mod engine;
pub mod errors;
pub mod evaluate;
pub mod fingerprint;
pub mod model;
pub mod providers;
pub mod signals;

pub mod history;
pub mod report;
pub mod session;
pub mod storage;

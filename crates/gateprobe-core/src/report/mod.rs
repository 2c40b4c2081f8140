pub mod plain;

pub use plain::{render_plain, MAX_ISSUES_SHOWN};

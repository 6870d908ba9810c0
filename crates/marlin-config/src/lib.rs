#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Typed player settings with JSON and environment loading.
//!
//! Layout: `model.rs` (settings model), `defaults.rs` (default values),
//! `validate.rs` (field checks), `loader.rs` (file/env loading), `error.rs`.

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ENV_PREFIX, apply_env_overrides, load, load_from_path, load_from_str};
pub use model::{LogStyle, PlayerSettings, ResumeAction};
pub use validate::validate;

//! Unified configuration layer.
//!
//! All environment reads go through this module; business code consumes
//! structured config instead of calling `std::env::var` directly.
//!
//! - `loader`: env_or, env_optional, env_bool, env_parse, `.env` loading
//! - `schema`: ObservabilityConfig
//! - `env_keys`: key constants and aliases

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{
    env_bool, env_optional, env_or, env_parse, load_dotenv, load_dotenv_from, remove_env_var,
    set_env_var, ScopedEnvGuard,
};
pub use schema::ObservabilityConfig;

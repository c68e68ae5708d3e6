//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `Run`            |
//! | `stages` | `Stages`         |
//! | `config` | `Config`         |

pub mod config;
pub mod run;
pub mod stages;

pub use config::cmd_config;
pub use run::cmd_run;
pub use stages::cmd_stages;

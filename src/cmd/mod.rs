//! CLI command implementations.
//!
//! | Module  | Commands handled |
//! |---------|------------------|
//! | `serve` | `Serve`          |
//! | `steps` | `Steps`          |

pub mod serve;
pub mod steps;

pub use serve::cmd_serve;
pub use steps::cmd_steps;

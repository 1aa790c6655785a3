//! Client configuration and the engine option registry.
//!
//! This module provides:
//!
//! - [`ClientConfig`] and [`ClientConfigBuilder`] for configuring the client
//! - [`CqpOption`], [`OptionKind`] and [`OptionValue`] for typed access to
//!   engine settings
//!
//! # Example
//!
//! ```ignore
//! use libcqp::config::ClientConfig;
//!
//! // Registry and executable from CORPUS_REGISTRY / CQP_PATH
//! let config = ClientConfig::builder().from_env().build()?;
//!
//! // Explicit
//! let config = ClientConfig::builder()
//!     .registry("/corpora/registry")
//!     .read_timeout(std::time::Duration::from_secs(300))
//!     .build()?;
//! ```

pub mod builder;
pub mod options;

pub use builder::{
    ClientConfig, ClientConfigBuilder, UndumpStrategy, DEFAULT_MAX_ERROR_LINES, ENV_CQP_PATH,
    ENV_REGISTRY,
};
pub use options::{quote_literal, CqpOption, OptionKind, OptionValue};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_exports_accessible() {
        let _: UndumpStrategy = UndumpStrategy::Pipe;
        let _: OptionKind = CqpOption::AutoShow.kind();
        let _: OptionValue = OptionValue::Bool(true);
        let _: &str = ENV_REGISTRY;
    }

    #[test]
    fn builder_accessible() {
        let _ = ClientConfig::builder();
    }
}

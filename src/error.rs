//! Error types for the chain-reorganization monitor.
//!
//! This module provides a unified error type [`MonitorError`] that encompasses
//! all failures the monitor can encounter while polling, probing chain
//! identity, and dispatching alerts.
//!
//! # Design
//!
//! The error hierarchy is organized by layer:
//! - [`MonitorError::ConfigError`]: Configuration and environment issues
//! - [`MonitorError::RpcError`]: RPC provider and network errors
//! - [`MonitorError::BlockNotFound`]: A height the node does not (yet) have
//! - [`MonitorError::StateError`]: Monitor state consistency errors
//! - [`MonitorError::AlertError`]: Webhook delivery failures (never fatal)
//!
//! All errors implement [`std::error::Error`] and carry rich context via the
//! source error chain.
//!
//! `BlockNotFound` gets special handling: the tick controller swallows it
//! silently, treating it as a race between the tip advancing and the fetch
//! landing on a node that has not seen the block yet. Both the dedicated
//! variant and any foreign error whose message contains the substring
//! `Block not found` are recognized via [`MonitorError::is_block_not_found`].

use std::fmt;

/// Result type alias using [`MonitorError`].
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Substring that marks an error as a benign missing-block race.
const BLOCK_NOT_FOUND_MARKER: &str = "Block not found";

/// Unified error type for the reorg monitor.
#[derive(Debug)]
pub enum MonitorError {
    /// Configuration or environment variable errors.
    ///
    /// Fatal at construction time: the monitor refuses to start without a
    /// usable RPC endpoint and sane depth parameters.
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// RPC provider or network errors.
    ///
    /// Transient by assumption: the tick loop reports these as `RPC_ERROR`
    /// events and keeps running.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The node reported that it has no block at the requested height.
    ///
    /// Usually a race between the tip advancing and our fetch; swallowed
    /// silently by the tick controller.
    BlockNotFound {
        /// The height that was requested
        height: u64,
    },

    /// Monitor state consistency errors.
    StateError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Alert webhook delivery errors.
    ///
    /// Logged to the diagnostic channel only; a failing sink must never
    /// stall the detector or drop an event from the primary log.
    AlertError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MonitorError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use reorg_monitor::error::MonitorError;
    ///
    /// let err = MonitorError::config("RPC_URL not set", None);
    /// assert!(matches!(err, MonitorError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    ///
    /// # Example
    ///
    /// ```
    /// use reorg_monitor::error::MonitorError;
    ///
    /// let err = MonitorError::rpc("Failed to fetch latest block", None);
    /// assert!(matches!(err, MonitorError::RpcError { .. }));
    /// ```
    #[must_use]
    pub fn rpc(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new missing-block error for the given height.
    #[must_use]
    pub const fn block_not_found(height: u64) -> Self {
        Self::BlockNotFound { height }
    }

    /// Create a new state error.
    #[must_use]
    pub fn state(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::StateError {
            message: message.into(),
            source,
        }
    }

    /// Create a new alert delivery error.
    #[must_use]
    pub fn alert(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::AlertError {
            message: message.into(),
            source,
        }
    }

    /// Whether this error represents a benign missing-block race.
    ///
    /// Matches the dedicated [`MonitorError::BlockNotFound`] variant as well
    /// as any error whose message contains the substring `Block not found`,
    /// so RPC clients that surface the node's own error text are recognized
    /// too.
    #[must_use]
    pub fn is_block_not_found(&self) -> bool {
        match self {
            Self::BlockNotFound { .. } => true,
            _ => self.to_string().contains(BLOCK_NOT_FOUND_MARKER),
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::BlockNotFound { height } => write!(f, "Block not found: height {height}"),
            Self::StateError { message, .. } => write!(f, "State error: {message}"),
            Self::AlertError { message, .. } => write!(f, "Alert error: {message}"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::StateError { source, .. }
            | Self::AlertError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::BlockNotFound { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_config_error() {
        let err = MonitorError::config("test error", None);
        assert!(matches!(err, MonitorError::ConfigError { .. }));
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_rpc_error() {
        let err = MonitorError::rpc("connection failed", None);
        assert!(matches!(err, MonitorError::RpcError { .. }));
        assert_eq!(err.to_string(), "RPC error: connection failed");
    }

    #[test]
    fn test_block_not_found_display_contains_marker() {
        let err = MonitorError::block_not_found(42);
        assert!(err.to_string().contains("Block not found"));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_is_block_not_found_variant() {
        assert!(MonitorError::block_not_found(7).is_block_not_found());
        assert!(!MonitorError::rpc("boom", None).is_block_not_found());
    }

    #[test]
    fn test_is_block_not_found_by_message_substring() {
        // An RPC client may surface the node's own error text instead of
        // using the dedicated variant.
        let err = MonitorError::rpc("upstream said: Block not found", None);
        assert!(err.is_block_not_found());
    }

    #[test]
    fn test_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = MonitorError::config("failed to load", Some(Box::new(source)));

        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Configuration error: failed to load");
    }

    #[test]
    fn test_error_trait() {
        let err = MonitorError::rpc("test", None);
        let _: &dyn std::error::Error = &err;
    }
}

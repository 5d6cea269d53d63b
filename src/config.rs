//! Server configuration and broadcast policy
//!
//! The two broadcast shapes the server supports differ in three switches,
//! so they are expressed as one [`BroadcastPolicy`] instead of two servers.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Default listening port
pub const DEFAULT_PORT: i32 = 8080;

/// Default bind host (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default maximum line length in bytes, for usernames and message bodies
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Body that ends a session when the policy supports it
pub const EXIT_COMMAND: &str = "/exit";

/// How a message is formatted and who receives it during fanout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastPolicy {
    /// Deliver the line back to its sender as well
    pub include_sender: bool,
    /// Prefix every line with `"<username>: "`
    pub prefix_with_username: bool,
    /// Treat the body `/exit` as a request to end the session
    pub supports_exit_command: bool,
}

impl BroadcastPolicy {
    /// `"<username>: <body>"` to everyone but the sender, with `/exit`
    pub const fn prefixed() -> Self {
        Self {
            include_sender: false,
            prefix_with_username: true,
            supports_exit_command: true,
        }
    }

    /// Raw body to everyone including the sender, no commands
    pub const fn raw() -> Self {
        Self {
            include_sender: true,
            prefix_with_username: false,
            supports_exit_command: false,
        }
    }

    /// Render the wire line for a message, terminator included
    pub fn format(&self, username: &str, body: &str) -> String {
        if self.prefix_with_username {
            format!("{}: {}\n", username, body)
        } else {
            format!("{}\n", body)
        }
    }

    /// Whether `body` is the exit command under this policy
    pub fn is_exit(&self, body: &str) -> bool {
        self.supports_exit_command && body == EXIT_COMMAND
    }
}

impl Default for BroadcastPolicy {
    fn default() -> Self {
        Self::prefixed()
    }
}

impl FromStr for BroadcastPolicy {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prefixed" => Ok(Self::prefixed()),
            "raw" => Ok(Self::raw()),
            other => Err(ChatError::InvalidConfiguration(format!(
                "unknown broadcast policy '{}' (expected 'prefixed' or 'raw')",
                other
            ))),
        }
    }
}

/// What the coordinator does when a username is already registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateUsernames {
    /// Overwrite the entry; the displaced session is closed
    #[default]
    Replace,
    /// Refuse the newcomer and close its connection
    Reject,
}

/// Configuration for a chat server instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host or IP to bind
    pub host: String,
    /// Listening port, must be in `1..=65535`
    pub port: i32,
    /// Longest line kept in bytes, longer lines are truncated
    pub max_line_length: usize,
    /// Fanout behaviour
    pub policy: BroadcastPolicy,
    /// Handling of a username that is already taken
    pub duplicate_usernames: DuplicateUsernames,
}

impl ServerConfig {
    /// Configuration with default settings on the given port
    pub fn new(port: i32) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Replace the broadcast policy
    pub fn with_policy(mut self, policy: BroadcastPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the duplicate-username handling
    pub fn with_duplicate_usernames(mut self, duplicates: DuplicateUsernames) -> Self {
        self.duplicate_usernames = duplicates;
        self
    }

    /// Check the configuration before anything is bound
    pub fn validate(&self) -> Result<(), ChatError> {
        self.valid_port()?;
        self.validate_limits()?;
        if self.host.trim().is_empty() {
            return Err(ChatError::InvalidConfiguration(
                "host must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` to bind, after validation
    pub fn bind_addr(&self) -> Result<String, ChatError> {
        self.validate()?;
        Ok(format!("{}:{}", self.host, self.port))
    }

    /// Parse a JSON configuration, missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ChatError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check the settings that do not concern the listening address
    pub fn validate_limits(&self) -> Result<(), ChatError> {
        if self.max_line_length == 0 {
            return Err(ChatError::InvalidConfiguration(
                "max_line_length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn valid_port(&self) -> Result<u16, ChatError> {
        if self.port <= 0 {
            return Err(ChatError::InvalidConfiguration(format!(
                "port must be positive, got {}",
                self.port
            )));
        }
        u16::try_from(self.port).map_err(|_| {
            ChatError::InvalidConfiguration(format!("port {} is out of range", self.port))
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            policy: BroadcastPolicy::default(),
            duplicate_usernames: DuplicateUsernames::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_positive_port_rejected() {
        for port in [0, -1, -8080] {
            let err = ServerConfig::new(port).validate().unwrap_err();
            assert!(matches!(err, ChatError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn test_port_out_of_range_rejected() {
        assert!(ServerConfig::new(70_000).validate().is_err());
        assert!(ServerConfig::new(65_535).validate().is_ok());
    }

    #[test]
    fn test_bind_addr() {
        let config = ServerConfig::new(9000);
        assert_eq!(config.bind_addr().unwrap(), "0.0.0.0:9000");
    }

    #[test]
    fn test_prefixed_format() {
        let policy = BroadcastPolicy::prefixed();
        assert_eq!(policy.format("alice", "hello"), "alice: hello\n");
        assert!(policy.is_exit("/exit"));
        assert!(!policy.is_exit("/exit now"));
    }

    #[test]
    fn test_raw_format() {
        let policy = BroadcastPolicy::raw();
        assert_eq!(policy.format("alice", "hello"), "hello\n");
        assert!(!policy.is_exit("/exit"));
        assert!(policy.include_sender);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("Raw".parse::<BroadcastPolicy>().unwrap(), BroadcastPolicy::raw());
        assert_eq!(
            "prefixed".parse::<BroadcastPolicy>().unwrap(),
            BroadcastPolicy::prefixed()
        );
        assert!("loud".parse::<BroadcastPolicy>().is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let config = ServerConfig::from_json(
            r#"{"port": 7000, "policy": {"include_sender": true}, "duplicate_usernames": "reject"}"#,
        )
        .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.host, DEFAULT_HOST);
        assert!(config.policy.include_sender);
        assert!(config.policy.prefix_with_username);
        assert_eq!(config.duplicate_usernames, DuplicateUsernames::Reject);
    }

    #[test]
    fn test_from_json_invalid_port() {
        let err = ServerConfig::from_json(r#"{"port": -5}"#).unwrap_err();
        assert!(matches!(err, ChatError::InvalidConfiguration(_)));
    }
}

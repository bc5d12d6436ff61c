//! Engine configuration

use super::error::{NodeError, Result};
use crate::{MAX_COMMAND_SIZE, MAX_LIST_SIZE};
use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Largest chunk the server will read and write at once
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Client engine configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on a connection attempt
    pub connect_timeout: Duration,

    /// Socket read buffer size
    pub read_buffer_size: usize,

    /// Listing bytes buffered before giving up on a LIST response
    pub max_list_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_buffer_size: 64 * 1024,
            max_list_size: MAX_LIST_SIZE,
        }
    }
}

impl ClientConfig {
    /// Check the configuration for unusable values
    ///
    /// # Errors
    ///
    /// Returns `NodeError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout must be non-zero"));
        }
        if self.read_buffer_size == 0 {
            return Err(invalid("read_buffer_size must be non-zero"));
        }
        if self.max_list_size == 0 {
            return Err(invalid("max_list_size must be non-zero"));
        }
        Ok(())
    }
}

/// Server engine configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_ip: IpAddr,

    /// File body chunk size
    pub chunk_size: usize,

    /// Largest command accepted in a single read
    pub max_command_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            chunk_size: ferry_files::DEFAULT_CHUNK_SIZE,
            max_command_size: MAX_COMMAND_SIZE,
        }
    }
}

impl ServerConfig {
    /// Check the configuration for unusable values
    ///
    /// # Errors
    ///
    /// Returns `NodeError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(NodeError::InvalidConfig(Cow::Owned(format!(
                "chunk_size must be between 1 and {MAX_CHUNK_SIZE}"
            ))));
        }
        if self.max_command_size < 64 {
            return Err(invalid("max_command_size must be at least 64"));
        }
        Ok(())
    }
}

fn invalid(reason: &'static str) -> NodeError {
    NodeError::InvalidConfig(Cow::Borrowed(reason))
}

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::job::FailurePolicy;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("exportq.db")
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Maximum number of patients placed in a single batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How a failed batch affects the status of its job.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Priority given to full-group exports when the request carries none.
    /// Lower values are claimed first.
    #[serde(default = "default_bulk_priority")]
    pub bulk_priority: i32,
    /// Priority given to narrower requests when the request carries none.
    #[serde(default = "default_single_priority")]
    pub single_priority: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            failure_policy: FailurePolicy::default(),
            bulk_priority: default_bulk_priority(),
            single_priority: default_single_priority(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_bulk_priority() -> i32 {
    5000
}

fn default_single_priority() -> i32 {
    1000
}

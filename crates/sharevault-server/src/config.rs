//! Server configuration.
//!
//! The config file is JSON with a cluster address list plus the two data
//! directories. The command line names this node by its 1-based position
//! in the cluster list. With `clean` set, both directories are removed and
//! recreated on startup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ServerError;

/// The configuration shipped when no config file is given or the given one
/// fails to parse.
pub const DEFAULT_CONFIG: &str = r#"{
  "cluster": [
    {"ip": "0.0.0.0", "port": "6000"},
    {"ip": "0.0.0.0", "port": "6001"},
    {"ip": "0.0.0.0", "port": "6002"},
    {"ip": "0.0.0.0", "port": "6003"}
  ],
  "database dir": "./meta/DedupDB/",
  "container dir": "./meta/Container/",
  "clean": true
}"#;

/// One cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Listen/connect ip.
    pub ip: String,
    /// Port, kept as a string to match the config format.
    pub port: String,
}

/// Parsed server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// All cluster members, this node included.
    pub cluster: Vec<ClusterNode>,
    /// Directory of the KV store.
    #[serde(rename = "database dir", default = "default_db_dir")]
    pub database_dir: PathBuf,
    /// Directory of container and recipe files.
    #[serde(rename = "container dir", default = "default_container_dir")]
    pub container_dir: PathBuf,
    /// Remove and recreate both directories on startup.
    #[serde(default = "default_clean")]
    pub clean: bool,
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("./meta/DedupDB/")
}

fn default_container_dir() -> PathBuf {
    PathBuf::from("./meta/Container/")
}

fn default_clean() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            cluster: (6000..6004)
                .map(|port| ClusterNode {
                    ip: "0.0.0.0".to_string(),
                    port: port.to_string(),
                })
                .collect(),
            database_dir: default_db_dir(),
            container_dir: default_container_dir(),
            clean: default_clean(),
        }
    }
}

impl ServerConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ServerError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate the 1-based node index from the command line, returning the
    /// 0-based position.
    pub fn self_index(&self, index: usize) -> Result<usize, ServerError> {
        if index == 0 || index > self.cluster.len() {
            return Err(ServerError::BadNodeIndex {
                index,
                nodes: self.cluster.len(),
            });
        }
        Ok(index - 1)
    }

    /// Socket address of a cluster member by 0-based position.
    pub fn address(&self, index: usize) -> Result<SocketAddr, ServerError> {
        let node = self.cluster.get(index).ok_or(ServerError::BadNodeIndex {
            index: index + 1,
            nodes: self.cluster.len(),
        })?;
        format!("{}:{}", node.ip, node.port)
            .parse()
            .map_err(|_| ServerError::BadAddress {
                ip: node.ip.clone(),
                port: node.port.clone(),
            })
    }

    /// Create the data directories, wiping them first when `clean` is set.
    pub fn prepare_directories(&self) -> Result<(), ServerError> {
        for dir in [&self.database_dir, &self.container_dir] {
            if self.clean && dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
            std::fs::create_dir_all(dir)?;
        }
        if self.clean {
            info!("data directories cleared and recreated");
        }
        Ok(())
    }
}

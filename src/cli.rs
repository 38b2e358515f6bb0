//! Command-line arguments for the prefsync binaries.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ClientConfig;
use crate::identity::Role;

#[derive(Parser, Debug)]
#[command(name = "prefsync-server", about = "Settings sync server")]
pub struct ServerArgs {
    #[arg(long, env = "PREFSYNC_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, env = "PREFSYNC_PORT", default_value_t = 3000)]
    pub port: u16,

    /// redb database file; settings are kept in memory when omitted
    #[arg(long, env = "PREFSYNC_DATABASE")]
    pub database: Option<PathBuf>,

    /// JSON file mapping bearer tokens to identities
    #[arg(long, env = "PREFSYNC_AUTH_FILE")]
    pub auth_file: PathBuf,
}

#[derive(Parser, Debug)]
#[command(name = "prefsync", about = "Read, edit and sync settings")]
pub struct ClientArgs {
    #[arg(long, env = "PREFSYNC_SERVER", default_value = "http://localhost:3000")]
    pub server: String,

    #[arg(long, env = "PREFSYNC_TOKEN")]
    pub token: Option<String>,

    /// Role the token belongs to; the server has the final say
    #[arg(long, env = "PREFSYNC_ROLE", default_value = "user", value_parser = ["user", "admin", "owner"])]
    pub role: String,

    /// Local cache file (defaults to the user data directory)
    #[arg(long, env = "PREFSYNC_CACHE")]
    pub cache: Option<PathBuf>,

    /// Quiet period before local edits are pushed
    #[arg(long, default_value_t = 500)]
    pub debounce_ms: u64,

    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// Print a scope's local document
    Get(ScopeArg),
    /// Set fields (`key=json-value`) and push them
    Set {
        #[command(flatten)]
        scope: ScopeArg,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Push dirty scopes and fetch newer ones
    Sync,
    /// Refetch everything from the server
    Pull,
    /// Hydrate from the server, discarding local state
    Login,
    /// Reset local state to defaults
    Reset,
    /// Print sync status
    Status,
}

#[derive(Args, Debug)]
pub struct ScopeArg {
    /// `user` or `global`
    #[arg(value_parser = ["user", "global"])]
    pub scope: String,
}

impl ClientArgs {
    pub fn role(&self) -> Role {
        match self.role.as_str() {
            "admin" => Role::Admin,
            "owner" => Role::Owner,
            _ => Role::User,
        }
    }

    pub fn to_config(&self) -> ClientConfig {
        ClientConfig {
            server: self.server.clone(),
            token: self.token.clone(),
            debounce_ms: self.debounce_ms,
            sync_interval_secs: None,
            request_timeout_secs: self.timeout_secs,
            cache_path: Some(
                self.cache
                    .clone()
                    .unwrap_or_else(ClientConfig::default_cache_path),
            ),
        }
    }
}

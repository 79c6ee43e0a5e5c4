//! Process launch contract between the panel and the wrapper.
//!
//! ```text
//! argv[0]  <wrapper>-<api version>
//! argv[1]  module path
//! argv[2]  unique id
//! argv[3]  socket id (window the plug embeds into)
//! argv[4]  internal plugin name
//! argv[5]  display name
//! argv[6]  comment
//! argv[7…] plugin arguments
//! ```

use crate::endpoint::Endpoint;
use crate::protocol::API_VERSION;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Positional arguments every wrapper invocation carries.
pub const REQUIRED_ARGS: usize = 7;

/// Longest process name the kernel keeps.
pub const MAX_PROCESS_NAME_LEN: usize = 15;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("not enough arguments passed to the wrapper: got {found}, need {required}")]
    TooFew { found: usize, required: usize },
    #[error("invalid unique id {0:?}")]
    UniqueId(String),
    #[error("invalid socket id {0:?}")]
    SocketId(String),
}

/// One plugin instance as the panel knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInstance {
    pub unique_id: u32,
    pub module_path: PathBuf,
    pub name: String,
    pub display_name: String,
    pub comment: String,
    pub arguments: Vec<String>,
}

impl PluginInstance {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.unique_id)
    }

    /// `argv[0]` for the wrapper: binary path joined with the API version.
    pub fn argv0(binary: &Path) -> String {
        format!("{}-{}", binary.display(), API_VERSION)
    }

    /// Everything after `argv[0]`.
    pub fn launch_args(&self, socket_id: u64) -> Vec<String> {
        let mut args = Vec::with_capacity(REQUIRED_ARGS - 1 + self.arguments.len());
        args.push(self.module_path.to_string_lossy().into_owned());
        args.push(self.unique_id.to_string());
        args.push(socket_id.to_string());
        args.push(self.name.clone());
        args.push(self.display_name.clone());
        args.push(self.comment.clone());
        args.extend(self.arguments.iter().cloned());
        args
    }
}

/// Launch arguments as parsed by the wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    pub program: String,
    pub module_path: PathBuf,
    pub unique_id: u32,
    pub socket_id: u64,
    pub name: String,
    pub display_name: String,
    pub comment: String,
    pub arguments: Vec<String>,
}

impl WorkerArgs {
    pub fn parse(argv: &[String]) -> Result<Self, ArgumentError> {
        if argv.len() < REQUIRED_ARGS {
            return Err(ArgumentError::TooFew {
                found: argv.len(),
                required: REQUIRED_ARGS,
            });
        }

        let unique_id = argv[2]
            .trim()
            .parse()
            .map_err(|_| ArgumentError::UniqueId(argv[2].clone()))?;
        let socket_id = argv[3]
            .trim()
            .parse()
            .map_err(|_| ArgumentError::SocketId(argv[3].clone()))?;

        Ok(Self {
            program: argv[0].clone(),
            module_path: PathBuf::from(&argv[1]),
            unique_id,
            socket_id,
            name: argv[4].clone(),
            display_name: argv[5].clone(),
            comment: argv[6].clone(),
            arguments: argv[REQUIRED_ARGS..].to_vec(),
        })
    }

    /// API version from `argv[0]`, if the panel appended one.
    pub fn api_version(&self) -> Option<&str> {
        let file_name = self.program.rsplit('/').next()?;
        file_name
            .rsplit_once('-')
            .map(|(_, version)| version)
            .filter(|version| version.chars().next().is_some_and(|c| c.is_ascii_digit()))
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.unique_id)
    }

    /// `bar-<id>-<name>`, cut to what the kernel keeps, so wrappers can be
    /// told apart in `ps`.
    pub fn process_name(&self) -> String {
        let mut name = format!("bar-{}-{}", self.unique_id, self.name);
        if name.len() > MAX_PROCESS_NAME_LEN {
            let mut end = MAX_PROCESS_NAME_LEN;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }
        name
    }
}

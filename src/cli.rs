//! Command-line arguments.

use crate::prompt::TerminalChannel;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tandem_jobs::{ConflictDecision, ErrorDecision, PolicyChannel, SymlinkDecision};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file layered over the platform defaults.
    #[arg(long, global = true, env = "TANDEM_CONFIG")]
    pub config: Option<PathBuf>,

    /// What to do when a file operation fails.
    #[arg(long, global = true, value_enum, default_value_t = OnError::Ask)]
    pub on_error: OnError,

    /// What to do when the destination already exists.
    #[arg(long, global = true, value_enum, default_value_t = OnConflict::Ask)]
    pub on_conflict: OnConflict,

    /// What to do with links to folders.
    #[arg(long, global = true, value_enum, default_value_t = OnSymlink::File)]
    pub on_symlink: OnSymlink,

    /// Walk every selection first so progress shows totals.
    #[arg(long, global = true)]
    pub totals: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// List a folder or an archive.
    Ls {
        /// Path or URL, e.g. `/tmp`, `s3://bucket/prefix` or `/tmp/a.zip!/docs`.
        address: String,
    },
    /// Copy files and folders into a destination folder.
    Cp {
        /// Sources followed by the destination folder.
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
    /// Move files and folders into a destination folder.
    Mv {
        /// Sources followed by the destination folder.
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
    /// Delete files and folders, recursively.
    Rm {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// Extract archives into a destination folder.
    Unpack {
        /// Archives followed by the destination folder.
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OnError {
    Ask,
    Skip,
    Cancel,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OnConflict {
    Ask,
    Overwrite,
    Skip,
    /// Pick the next free `name (n).ext`.
    Rename,
    Cancel,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OnSymlink {
    Ask,
    Follow,
    File,
    Skip,
}

impl Cli {
    /// The decision channel the flags describe. Questions answered `ask` go
    /// to the terminal, the rest are answered by policy.
    pub fn channel(&self) -> TerminalChannel {
        let mut policy = PolicyChannel::default();
        policy = match self.on_error {
            OnError::Skip => policy.on_error(ErrorDecision::Skip),
            OnError::Ask | OnError::Cancel => policy.on_error(ErrorDecision::Cancel),
        };
        policy = match self.on_conflict {
            OnConflict::Overwrite => policy.on_conflict(ConflictDecision::Overwrite),
            OnConflict::Skip => policy.on_conflict(ConflictDecision::Skip),
            OnConflict::Rename => policy.auto_rename(),
            OnConflict::Ask | OnConflict::Cancel => policy.on_conflict(ConflictDecision::Cancel),
        };
        policy = match self.on_symlink {
            OnSymlink::Follow => policy.on_symlink(SymlinkDecision::FollowAsFolder),
            OnSymlink::Skip => policy.on_symlink(SymlinkDecision::Skip),
            OnSymlink::Ask | OnSymlink::File => policy.on_symlink(SymlinkDecision::TreatAsFile),
        };
        TerminalChannel::new(policy)
            .ask_errors(self.on_error == OnError::Ask)
            .ask_conflicts(self.on_conflict == OnConflict::Ask)
            .ask_symlinks(self.on_symlink == OnSymlink::Ask)
    }
}

/// Split `paths` into sources and the trailing destination.
pub fn split_destination(paths: &[String]) -> Option<(&[String], &String)> {
    let (destination, sources) = paths.split_last()?;
    (!sources.is_empty()).then_some((sources, destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_cli_shape() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["cp", "/a", "/b", "/dst"], 2)]
    #[case(&["mv", "/a", "/dst"], 1)]
    fn test_sources_and_destination(#[case] args: &[&str], #[case] sources: usize) {
        let cli = Cli::try_parse_from(std::iter::once("tandem").chain(args.iter().copied())).unwrap();
        let (Command::Cp { paths } | Command::Mv { paths }) = cli.command else {
            panic!("unexpected command");
        };
        let (found, destination) = split_destination(&paths).unwrap();
        assert_eq!(found.len(), sources);
        assert_eq!(destination, "/dst");
    }

    #[test]
    fn test_copy_needs_a_destination() {
        assert!(Cli::try_parse_from(["tandem", "cp", "/only"]).is_err());
    }

    #[test]
    fn test_policy_flags() {
        let cli = Cli::try_parse_from(["tandem", "--on-error", "skip", "--on-conflict", "rename", "rm", "/x"]).unwrap();
        assert_eq!(cli.on_error, OnError::Skip);
        assert_eq!(cli.on_conflict, OnConflict::Rename);
        assert_eq!(cli.on_symlink, OnSymlink::File);
        let channel = cli.channel();
        assert!(!channel.asks_errors());
        assert!(!channel.asks_conflicts());
    }
}

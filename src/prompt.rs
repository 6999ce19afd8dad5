//! Asking the person at the terminal.

use async_trait::async_trait;
use std::io::{BufRead, Write};
use tandem_jobs::decision::next_free_name;
use tandem_jobs::{
    ChannelClosed, ConflictContext, ConflictDecision, DecisionChannel, ErrorDecision, FaultContext, PolicyChannel,
    SymlinkDecision,
};
use tandem_vfs::error::ErrorKind as VfsErrorKind;
use tandem_vfs::{FileAddress, Metadata};
use time::format_description::well_known::Rfc3339;

/// Prompts on stderr and reads answers from stdin. Questions it wasn't told
/// to ask are answered by the wrapped policy.
#[derive(Clone, Debug)]
pub struct TerminalChannel {
    policy: PolicyChannel,
    errors: bool,
    conflicts: bool,
    symlinks: bool,
}
impl TerminalChannel {
    pub fn new(policy: PolicyChannel) -> Self {
        Self {
            policy,
            errors: false,
            conflicts: false,
            symlinks: false,
        }
    }

    pub fn ask_errors(mut self, ask: bool) -> Self {
        self.errors = ask;
        self
    }

    pub fn ask_conflicts(mut self, ask: bool) -> Self {
        self.conflicts = ask;
        self
    }

    pub fn ask_symlinks(mut self, ask: bool) -> Self {
        self.symlinks = ask;
        self
    }

    #[cfg(test)]
    pub fn asks_errors(&self) -> bool {
        self.errors
    }

    #[cfg(test)]
    pub fn asks_conflicts(&self) -> bool {
        self.conflicts
    }
}

#[async_trait]
impl DecisionChannel for TerminalChannel {
    async fn resolve_symlink(&self, path: &FileAddress, canonical: &FileAddress) -> Result<SymlinkDecision, ChannelClosed> {
        if !self.symlinks {
            return self.policy.resolve_symlink(path, canonical).await;
        }
        let question = format!("{path} links to the folder {canonical}.\n[f]ollow, [t]reat as file, [s]kip, [c]ancel?");
        loop {
            if let Some(decision) = parse_symlink(&read_answer(question.clone()).await?) {
                return Ok(decision);
            }
        }
    }

    async fn on_error(&self, context: &FaultContext, fault: &VfsErrorKind) -> Result<ErrorDecision, ChannelClosed> {
        if !self.errors {
            return DecisionChannel::on_error(&self.policy, context, fault).await;
        }
        let question = format!(
            "{} failed (attempt {}): {fault}\n[r]etry, [s]kip, [c]ancel?",
            context.path, context.attempt
        );
        loop {
            if let Some(decision) = parse_error(&read_answer(question.clone()).await?) {
                return Ok(decision);
            }
        }
    }

    async fn on_conflict(&self, context: &ConflictContext) -> Result<ConflictDecision, ChannelClosed> {
        if !self.conflicts {
            return DecisionChannel::on_conflict(&self.policy, context).await;
        }
        let name = context.destination.name().unwrap_or_default().to_string();
        let question = format!(
            "{} already exists.\n  source:      {}\n  destination: {}\n\
             [o]verwrite, overwrite [a]ll, overwrite if [i] older, [r]esume, [s]kip, s[k]ip all, \
             re[n]ame [name], [c]ancel?",
            context.destination,
            describe(&context.source_metadata),
            describe(&context.destination_metadata),
        );
        loop {
            if let Some(decision) = parse_conflict(&read_answer(question.clone()).await?, &name) {
                return Ok(decision);
            }
        }
    }
}

/// One line of metadata for listings and prompts.
pub fn describe(metadata: &Metadata) -> String {
    let size = metadata.size.map_or_else(|| "?".to_string(), |size| size.to_string());
    let modified = metadata.modified.format(&Rfc3339).unwrap_or_else(|_| "?".to_string());
    format!("{size:>12} bytes  {modified}")
}

/// Read one line without holding up the runtime. End of input means nobody
/// is left to answer.
async fn read_answer(question: String) -> Result<String, ChannelClosed> {
    tokio::task::spawn_blocking(move || {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "{question} ");
        let _ = stderr.flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => Err(ChannelClosed),
            Ok(_) => Ok(line.trim().to_string()),
        }
    })
    .await
    .map_err(|_| ChannelClosed)?
}

fn first_letter(answer: &str) -> Option<char> {
    answer.chars().next().map(|c| c.to_ascii_lowercase())
}

fn parse_error(answer: &str) -> Option<ErrorDecision> {
    match first_letter(answer)? {
        'r' => Some(ErrorDecision::Retry),
        's' => Some(ErrorDecision::Skip),
        'c' => Some(ErrorDecision::Cancel),
        _ => None,
    }
}

fn parse_symlink(answer: &str) -> Option<SymlinkDecision> {
    match first_letter(answer)? {
        'f' => Some(SymlinkDecision::FollowAsFolder),
        't' => Some(SymlinkDecision::TreatAsFile),
        's' => Some(SymlinkDecision::Skip),
        'c' => Some(SymlinkDecision::Cancel),
        _ => None,
    }
}

/// `n` alone renames to the next free name after `existing`.
fn parse_conflict(answer: &str, existing: &str) -> Option<ConflictDecision> {
    let (choice, rest) = answer.split_once(char::is_whitespace).unwrap_or((answer, ""));
    if choice.chars().count() != 1 {
        return None;
    }
    let decision = match first_letter(choice)? {
        'o' => ConflictDecision::Overwrite,
        'a' => ConflictDecision::OverwriteAll,
        'i' => ConflictDecision::OverwriteIfOlder,
        'r' => ConflictDecision::Resume,
        's' => ConflictDecision::Skip,
        'k' => ConflictDecision::SkipAll,
        'n' => match rest.trim() {
            "" => ConflictDecision::Rename(next_free_name(existing)),
            name if name.contains('/') => return None,
            name => ConflictDecision::Rename(name.to_string()),
        },
        'c' => ConflictDecision::Cancel,
        _ => return None,
    };
    Some(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("o", Some(ConflictDecision::Overwrite))]
    #[case("A", Some(ConflictDecision::OverwriteAll))]
    #[case("i", Some(ConflictDecision::OverwriteIfOlder))]
    #[case("r", Some(ConflictDecision::Resume))]
    #[case("k", Some(ConflictDecision::SkipAll))]
    #[case("n", Some(ConflictDecision::Rename("notes (1).txt".to_string())))]
    #[case("n  draft.txt ", Some(ConflictDecision::Rename("draft.txt".to_string())))]
    #[case("n ../escape.txt", None)]
    #[case("overwrite", None)]
    #[case("", None)]
    fn test_parse_conflict(#[case] answer: &str, #[case] expected: Option<ConflictDecision>) {
        assert_eq!(parse_conflict(answer.trim_start(), "notes.txt"), expected);
    }

    #[rstest]
    #[case("r", Some(ErrorDecision::Retry))]
    #[case("Skip", Some(ErrorDecision::Skip))]
    #[case("x", None)]
    fn test_parse_error(#[case] answer: &str, #[case] expected: Option<ErrorDecision>) {
        assert_eq!(parse_error(answer), expected);
    }

    #[rstest]
    #[case("f", Some(SymlinkDecision::FollowAsFolder))]
    #[case("t", Some(SymlinkDecision::TreatAsFile))]
    #[case("c", Some(SymlinkDecision::Cancel))]
    #[case("?", None)]
    fn test_parse_symlink(#[case] answer: &str, #[case] expected: Option<SymlinkDecision>) {
        assert_eq!(parse_symlink(answer), expected);
    }

    #[tokio::test]
    async fn test_unasked_questions_use_the_policy() {
        let channel = TerminalChannel::new(PolicyChannel::default().on_symlink(SymlinkDecision::Skip));
        let path = FileAddress::parse("/tmp/link").unwrap();
        let target = FileAddress::parse("/tmp/target").unwrap();
        assert_eq!(channel.resolve_symlink(&path, &target).await, Ok(SymlinkDecision::Skip));
    }
}

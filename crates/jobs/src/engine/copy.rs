//! Copy, move and unpack.
//!
//! Folders are merged into whatever already exists at the destination;
//! files that already exist go to the decision channel. A move is a native
//! rename where the backend offers one and nothing is in the way, and a copy
//! followed by deleting each source otherwise.

use super::{Engine, Halt, Outcome, Recovery, Standing, Step};
use crate::decision::{ConflictContext, ConflictDecision, SymlinkDecision};
use derive_more::Display;
use futures::future::BoxFuture;
use std::sync::Arc;
use tandem_vfs::error::ErrorKind as VfsErrorKind;
use tandem_vfs::{ArchiveNode, CopyHint, FileAddress, Metadata, NodeHandle, NodeKind};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub(crate) enum Mode {
    #[display("copy")]
    Copy,
    #[display("move")]
    Move,
}

/// What the destination of a file looked like.
enum Probe {
    Missing,
    Present(Metadata),
    /// Couldn't tell, and the fault was skipped.
    Skipped,
}

/// How a name clash was settled.
enum Resolution {
    Overwrite,
    Resume,
    Skip,
    Rename(String),
}

impl Engine {
    /// Copy or move `source` into `folder` under `name`.
    pub(super) fn copy_node(
        &mut self,
        source: NodeHandle,
        folder: NodeHandle,
        name: String,
        mode: Mode,
    ) -> BoxFuture<'_, Step<Outcome>> {
        Box::pin(async move {
            self.checkpoint().await?;
            let address = source.address().clone();
            self.reporter.started(&address);
            let Some(metadata) = self.retry(&address, || source.metadata()).await? else {
                return Ok(Outcome::Skipped);
            };
            let Some(target) = self.retry(&address, || folder.child(&name)).await? else {
                return Ok(Outcome::Skipped);
            };
            if target.address() == &address || address.is_ancestor_of(target.address()) {
                self.refuse(&address, format!("cannot {mode} {address} into itself"));
                return Ok(Outcome::Skipped);
            }

            if mode == Mode::Move && source.move_hint(&*target) == CopyHint::UseBackendNativeCopy {
                match self.probe(&target).await? {
                    Probe::Skipped => return Ok(Outcome::Skipped),
                    Probe::Missing => return self.rename(&source, &target, &metadata).await,
                    // Something's in the way: merge or settle the conflict the
                    // long way round.
                    Probe::Present(_) => {},
                }
            }

            match metadata.kind {
                NodeKind::Directory => self.copy_folder(source, folder, name, target, None, mode).await,
                NodeKind::Symlink { to_directory: true } => {
                    let Some(canonical) = self.retry(&address, || source.canonical()).await? else {
                        return Ok(Outcome::Skipped);
                    };
                    match self.decide(&address, self.context.channel.resolve_symlink(&address, &canonical)).await? {
                        SymlinkDecision::FollowAsFolder => {
                            self.copy_folder(source, folder, name, target, Some(canonical), mode).await
                        },
                        SymlinkDecision::TreatAsFile => {
                            // Links can't be streamed; only a native rename
                            // (above) moves one.
                            tracing::debug!(path = %address, "Not copying symbolic link");
                            self.reporter.skipped(&address);
                            Ok(Outcome::Skipped)
                        },
                        SymlinkDecision::Skip => {
                            self.reporter.skipped(&address);
                            Ok(Outcome::Skipped)
                        },
                        SymlinkDecision::Cancel => Err(Halt::Interrupted),
                    }
                },
                NodeKind::Regular | NodeKind::Symlink { to_directory: false } => {
                    self.copy_file(source, metadata, folder, target, mode).await
                },
            }
        })
    }

    /// Record a per-node fault that isn't worth asking about.
    fn refuse(&mut self, path: &FileAddress, cause: String) {
        tracing::warn!(%path, %cause, "Refusing");
        self.reporter.faulted(path, cause);
        self.reporter.skipped(path);
    }

    async fn probe(&mut self, node: &NodeHandle) -> Step<Probe> {
        let mut attempt = 0;
        loop {
            self.checkpoint().await?;
            match node.metadata().await {
                Ok(metadata) => return Ok(Probe::Present(metadata)),
                Err(err) if matches!(&*err, VfsErrorKind::NotFound(_)) => return Ok(Probe::Missing),
                Err(err) => {
                    attempt += 1;
                    if let Recovery::Skip = self.resolve_fault(node.address(), err, attempt).await? {
                        return Ok(Probe::Skipped);
                    }
                },
            }
        }
    }

    async fn rename(&mut self, source: &NodeHandle, target: &NodeHandle, metadata: &Metadata) -> Step<Outcome> {
        let address = source.address();
        if self.retry(address, || source.rename_or_move(target.address())).await?.is_none() {
            return Ok(Outcome::Skipped);
        }
        tracing::debug!(%address, to = %target.address(), "Renamed");
        self.changes.touch(address);
        self.changes.touch(target.address());
        if !metadata.kind.is_directory() {
            self.reporter.file_done();
        }
        Ok(Outcome::Done)
    }

    /// Walk a folder into `target`, which is `name` inside `folder`. `link`
    /// is where the source points when it's a followed symbolic link.
    async fn copy_folder(
        &mut self,
        source: NodeHandle,
        folder: NodeHandle,
        name: String,
        target: NodeHandle,
        link: Option<FileAddress>,
        mode: Mode,
    ) -> Step<Outcome> {
        let address = source.address().clone();
        let canonical = match &link {
            Some(linked) => linked.clone(),
            None => Self::canonical(&*source).await,
        };
        if !self.enter_folder(&*source, canonical) {
            return Ok(Outcome::Skipped);
        }

        let target = match self.probe(&target).await? {
            Probe::Skipped => return Ok(Outcome::Skipped),
            Probe::Present(existing) if existing.kind.is_directory() => target,
            Probe::Present(_) => {
                self.refuse(&address, format!("{} exists and is not a folder", target.address()));
                return Ok(Outcome::Skipped);
            },
            Probe::Missing => {
                let Some(created) = self.retry(target.address(), || folder.mkdir(&name)).await? else {
                    return Ok(Outcome::Skipped);
                };
                self.changes.touch(created.address());
                created
            },
        };

        let Some(children) = self.retry(&address, || source.list()).await? else {
            return Ok(Outcome::Skipped);
        };
        let mut outcome = Outcome::Done;
        for child in children {
            let child_name = child.name();
            if self.copy_node(child, Arc::clone(&target), child_name, mode).await? == Outcome::Skipped {
                outcome = Outcome::Skipped;
            }
        }
        if mode == Mode::Copy || outcome == Outcome::Skipped {
            return Ok(outcome);
        }
        // Everything below has moved; drop the emptied source.
        let outcome = self.remove(&source, false).await?;
        match link {
            Some(linked) if outcome == Outcome::Done => self.remove_link_target(&linked).await,
            _ => Ok(outcome),
        }
    }

    async fn copy_file(
        &mut self,
        source: NodeHandle,
        metadata: Metadata,
        folder: NodeHandle,
        mut target: NodeHandle,
        mode: Mode,
    ) -> Step<Outcome> {
        let address = source.address().clone();
        let mut offset = 0;
        loop {
            let existing = match self.probe(&target).await? {
                Probe::Skipped => return Ok(Outcome::Skipped),
                Probe::Missing => break,
                Probe::Present(existing) => existing,
            };
            if existing.kind.is_directory() {
                self.refuse(&address, format!("{} exists and is a folder", target.address()));
                return Ok(Outcome::Skipped);
            }
            match self.settle_conflict(&source, &metadata, &target, existing.clone()).await? {
                Resolution::Overwrite => break,
                Resolution::Resume => {
                    offset = existing.size.unwrap_or(0);
                    break;
                },
                Resolution::Skip => {
                    tracing::debug!(path = %address, "Skipping existing file");
                    self.reporter.skipped(&address);
                    return Ok(Outcome::Skipped);
                },
                Resolution::Rename(new_name) => {
                    let Some(renamed) = self.retry(&address, || folder.child(&new_name)).await? else {
                        return Ok(Outcome::Skipped);
                    };
                    target = renamed;
                },
            }
        }

        if offset == 0 && source.copy_hint(&*target) == CopyHint::UseBackendNativeCopy {
            if self.retry(&address, || source.native_copy(&*target)).await?.is_none() {
                return Ok(Outcome::Skipped);
            }
            tracing::debug!(path = %address, to = %target.address(), "Copied natively");
            self.reporter.add_bytes(metadata.size.unwrap_or(0));
        } else if self.stream_file(&source, &target, offset).await? == Outcome::Skipped {
            return Ok(Outcome::Skipped);
        }
        self.reporter.file_done();
        self.changes.touch(target.address());

        if mode == Mode::Move {
            return self.remove(&source, false).await;
        }
        Ok(Outcome::Done)
    }

    /// Streamed copy of one file, retried as a whole.
    async fn stream_file(&mut self, source: &NodeHandle, target: &NodeHandle, mut offset: u64) -> Step<Outcome> {
        let resuming = offset > 0;
        let mut attempt = 0;
        loop {
            self.checkpoint().await?;
            if resuming && attempt > 0 {
                // A failed attempt may have appended part of the file.
                if let Ok(Some(size)) = target.metadata().await.map(|m| m.size) {
                    offset = size;
                }
            }
            let copied = match source.open_read(offset).await {
                Err(err) => Err(err),
                Ok(reader) => match target.open_write(resuming).await {
                    Err(err) => Err(err),
                    Ok(writer) => self.stream(reader, writer, source.address(), target.address()).await?,
                },
            };
            match copied {
                Ok(_) => return Ok(Outcome::Done),
                Err(err) => {
                    attempt += 1;
                    if let Recovery::Skip = self.resolve_fault(source.address(), err, attempt).await? {
                        return Ok(Outcome::Skipped);
                    }
                },
            }
        }
    }

    async fn settle_conflict(
        &mut self,
        source: &NodeHandle,
        source_metadata: &Metadata,
        target: &NodeHandle,
        target_metadata: Metadata,
    ) -> Step<Resolution> {
        let target_modified = target_metadata.modified;
        let decision = match self.standing {
            Some(Standing::OverwriteAll) => ConflictDecision::Overwrite,
            Some(Standing::SkipAll) => ConflictDecision::Skip,
            Some(Standing::OverwriteIfOlder) => ConflictDecision::OverwriteIfOlder,
            None => {
                let context = ConflictContext {
                    job_id: self.id,
                    source: source.address().clone(),
                    source_metadata: source_metadata.clone(),
                    destination: target.address().clone(),
                    destination_metadata: target_metadata,
                };
                self.decide(target.address(), self.context.channel.on_conflict(&context)).await?
            },
        };
        tracing::debug!(path = %target.address(), ?decision, "Conflict settled");
        Ok(match decision {
            ConflictDecision::Overwrite => Resolution::Overwrite,
            ConflictDecision::OverwriteAll => {
                self.standing = Some(Standing::OverwriteAll);
                Resolution::Overwrite
            },
            ConflictDecision::OverwriteIfOlder => {
                self.standing = Some(Standing::OverwriteIfOlder);
                if target_modified < source_metadata.modified { Resolution::Overwrite } else { Resolution::Skip }
            },
            ConflictDecision::Resume => Resolution::Resume,
            ConflictDecision::Skip => Resolution::Skip,
            ConflictDecision::SkipAll => {
                self.standing = Some(Standing::SkipAll);
                Resolution::Skip
            },
            ConflictDecision::Rename(name) => Resolution::Rename(name),
            ConflictDecision::Cancel => return Err(Halt::Interrupted),
        })
    }

    /// Copy the contents of archive `member` into `destination`.
    pub(super) async fn unpack(&mut self, member: NodeHandle, destination: &NodeHandle) -> Step<Outcome> {
        self.checkpoint().await?;
        let address = member.address().clone();
        self.reporter.started(&address);
        let sniff = self.context.registry.sniffs_archives();
        let Some(archive) = self.retry(&address, || ArchiveNode::open_with(Arc::clone(&member), sniff)).await? else {
            return Ok(Outcome::Skipped);
        };
        let root: NodeHandle = Arc::new(archive);
        let Some(entries) = self.retry(&address, || root.list()).await? else {
            return Ok(Outcome::Skipped);
        };
        let mut outcome = Outcome::Done;
        for entry in entries {
            let name = entry.name();
            if self.copy_node(entry, Arc::clone(destination), name, Mode::Copy).await? == Outcome::Skipped {
                outcome = Outcome::Skipped;
            }
        }
        Ok(outcome)
    }
}

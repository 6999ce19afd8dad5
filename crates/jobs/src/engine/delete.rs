use super::{Engine, Halt, Outcome, Step};
use crate::decision::SymlinkDecision;
use futures::future::BoxFuture;
use std::sync::Arc;
use tandem_vfs::{FileAddress, NodeHandle, NodeKind};

impl Engine {
    /// Delete `node` and, for folders, everything below it first. A folder
    /// with anything skipped below it is left in place.
    pub(super) fn delete_node(&mut self, node: NodeHandle) -> BoxFuture<'_, Step<Outcome>> {
        Box::pin(async move {
            self.checkpoint().await?;
            let address = node.address().clone();
            self.reporter.started(&address);
            let Some(metadata) = self.retry(&address, || node.metadata()).await? else {
                return Ok(Outcome::Skipped);
            };
            match metadata.kind {
                NodeKind::Directory => {
                    let canonical = Self::canonical(&*node).await;
                    if self.delete_children(&node, canonical).await? == Outcome::Skipped {
                        return Ok(Outcome::Skipped);
                    }
                    self.remove(&node, false).await
                },
                NodeKind::Symlink { to_directory: true } => {
                    let Some(canonical) = self.retry(&address, || node.canonical()).await? else {
                        return Ok(Outcome::Skipped);
                    };
                    match self.decide(&address, self.context.channel.resolve_symlink(&address, &canonical)).await? {
                        SymlinkDecision::FollowAsFolder => {
                            if self.delete_children(&node, canonical.clone()).await? == Outcome::Skipped {
                                return Ok(Outcome::Skipped);
                            }
                            if self.remove(&node, false).await? == Outcome::Skipped {
                                return Ok(Outcome::Skipped);
                            }
                            self.remove_link_target(&canonical).await
                        },
                        SymlinkDecision::TreatAsFile => self.remove(&node, true).await,
                        SymlinkDecision::Skip => {
                            tracing::debug!(path = %address, "Skipping symbolic link");
                            self.reporter.skipped(&address);
                            Ok(Outcome::Skipped)
                        },
                        SymlinkDecision::Cancel => Err(Halt::Interrupted),
                    }
                },
                NodeKind::Regular | NodeKind::Symlink { to_directory: false } => self.remove(&node, true).await,
            }
        })
    }

    async fn delete_children(&mut self, node: &NodeHandle, canonical: FileAddress) -> Step<Outcome> {
        if !self.enter_folder(&**node, canonical) {
            return Ok(Outcome::Skipped);
        }
        let Some(children) = self.retry(node.address(), || node.list()).await? else {
            return Ok(Outcome::Skipped);
        };
        let mut outcome = Outcome::Done;
        for child in children {
            if self.delete_node(child).await? == Outcome::Skipped {
                outcome = Outcome::Skipped;
            }
        }
        Ok(outcome)
    }

    /// The delete primitive. `counts` says whether the node counts as a
    /// finished file.
    pub(super) async fn remove(&mut self, node: &NodeHandle, counts: bool) -> Step<Outcome> {
        let address = node.address();
        if self.retry(address, || node.delete()).await?.is_none() {
            return Ok(Outcome::Skipped);
        }
        tracing::debug!(path = %address, "Deleted");
        self.changes.touch(address);
        if counts {
            self.reporter.file_done();
        }
        Ok(Outcome::Done)
    }

    /// Remove the folder a followed link pointed at, now that it's empty.
    pub(super) async fn remove_link_target(&mut self, canonical: &FileAddress) -> Step<Outcome> {
        let registry = Arc::clone(&self.context.registry);
        let Some(target) = self.retry(canonical, || registry.resolve(canonical)).await? else {
            return Ok(Outcome::Skipped);
        };
        self.remove(&target, false).await
    }
}

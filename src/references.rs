//! Reference collection, hiding, and advertisement formatting.
//!
//! Grounded on `services/references.rs`'s `ReferenceManager`, the cleanest,
//! self-contained version in the teacher tree. `server/handshake.rs` built a
//! parallel `collect_advertised_refs` returning a `Reference{name, target,
//! peeled}` struct shape that does not match this crate's actual
//! `ProtocolRef` enum (`types::Reference`) and was not used.

use crate::{
    config::ServerOptions,
    error::{Error, Result},
    types::*,
};
use bstr::{ByteSlice, ByteVec};
use gix::Repository;

/// Reference manager for collection, hiding, and advertisement formatting.
pub struct ReferenceManager<'a> {
    repository: &'a Repository,
    options: &'a ServerOptions,
}

impl<'a> ReferenceManager<'a> {
    /// Create a new reference manager.
    pub fn new(repository: &'a Repository, options: &'a ServerOptions) -> Self {
        Self { repository, options }
    }

    /// Collect all references that should be advertised (no prefix filter).
    pub fn collect_advertised_references(&self) -> Result<Vec<Reference>> {
        self.collect_references_with_prefixes(&[])
    }

    /// Resolve a single reference name to its tip object id, honoring
    /// `transfer.hideRefs`. Used for protocol v2's `want-ref`.
    pub fn resolve(&self, name: &str) -> Result<gix_hash::ObjectId> {
        if self.options.is_ref_hidden(name) {
            return Err(Error::ReferenceNotFound { name: name.to_string() });
        }
        let reference = self
            .repository
            .find_reference(name)
            .map_err(|_| Error::ReferenceNotFound { name: name.to_string() })?;
        reference
            .into_fully_peeled_id()
            .map(|id| id.detach())
            .map_err(|e| Error::custom(format!("failed to peel {name}: {e}")))
    }

    /// All ref tip object ids, ignoring `transfer.hideRefs` entirely. Used
    /// by the `Tip`/`ReachableCommitTip` request policies, which per the
    /// native protocol check against the repository's full tip set rather
    /// than the (possibly narrower) advertised set.
    pub fn all_tip_oids(&self) -> Result<std::collections::HashSet<gix_hash::ObjectId>> {
        let mut tips = std::collections::HashSet::new();
        if let Ok(head) = self.repository.head_id() {
            tips.insert(head.detach());
        }
        let reference_store = self.repository.references().map_err(Error::RefPackedBuffer)?;
        let all_references = reference_store.all().map_err(Error::RefIterInit)?;
        for reference in all_references.flatten() {
            if let gix::refs::TargetRef::Object(oid) = reference.target() {
                tips.insert(oid.to_owned());
            }
        }
        Ok(tips)
    }

    /// Collect references with optional prefix filtering (protocol v2's
    /// `ls-refs`).
    pub fn collect_references_with_prefixes(&self, prefixes: &[String]) -> Result<Vec<Reference>> {
        let mut refs = Vec::new();

        if let Ok(head) = self.repository.head() {
            match head.kind {
                gix::head::Kind::Symbolic(target_ref) => {
                    if let gix::refs::Target::Object(oid) = &target_ref.target {
                        refs.push(ProtocolRef::Symbolic {
                            full_ref_name: "HEAD".into(),
                            target: target_ref.name.as_bstr().to_owned(),
                            tag: None,
                            object: *oid,
                        });
                    }
                }
                gix::head::Kind::Detached { target, .. } => {
                    refs.push(ProtocolRef::Direct {
                        full_ref_name: "HEAD".into(),
                        object: target,
                    });
                }
                gix::head::Kind::Unborn(_) => {}
            }
        }

        let reference_store = self.repository.references().map_err(Error::RefPackedBuffer)?;
        let all_references = reference_store.all().map_err(Error::RefIterInit)?;

        let mut filtered_refs = Vec::new();
        for reference in all_references.flatten() {
            let ref_name = reference.name().as_bstr().to_str_lossy();
            if prefixes.is_empty() || prefixes.iter().any(|prefix| ref_name.starts_with(prefix)) {
                filtered_refs.push(reference);
            }
        }

        for reference in filtered_refs {
            let name = reference.name().as_bstr().to_owned();
            if self.options.is_ref_hidden(&name.to_str_lossy()) {
                continue;
            }

            match reference.target() {
                gix::refs::TargetRef::Symbolic(target_ref_name) => {
                    if let Some(Ok(resolved_ref)) = reference.follow() {
                        refs.push(ProtocolRef::Symbolic {
                            full_ref_name: name,
                            target: target_ref_name.as_bstr().to_owned(),
                            tag: None,
                            object: resolved_ref.target().id().to_owned(),
                        });
                    }
                }
                gix::refs::TargetRef::Object(oid) => {
                    let target = oid.to_owned();
                    refs.push(ProtocolRef::Direct {
                        full_ref_name: name.clone(),
                        object: target,
                    });

                    if name.starts_with_str("refs/tags/") {
                        if let Some(peeled) = self
                            .repository
                            .find_tag(target)
                            .ok()
                            .and_then(|tag| tag.target_id().ok())
                            .map(|id| id.detach())
                        {
                            let mut peeled_name = name.clone();
                            peeled_name.push_str("^{}");
                            refs.push(ProtocolRef::Direct {
                                full_ref_name: peeled_name,
                                object: peeled,
                            });
                        }
                    }
                }
            }
        }

        Ok(refs)
    }

    /// Format references for protocol v1 advertisement (first ref carries
    /// the capability string, per `git-protocol-common(5)`).
    pub fn format_v1_advertisement(&self, refs: &[Reference], capabilities: &str) -> Vec<String> {
        let null_oid = gix_hash::ObjectId::null(self.repository.object_hash());
        let mut lines = Vec::new();

        if refs.is_empty() {
            lines.push(format!("{} capabilities^{{}}\0{}", null_oid.to_hex(), capabilities));
            return lines;
        }

        let first = &refs[0];
        lines.push(format!(
            "{} {}\0{}",
            first.target_oid().to_hex(),
            first.ref_name(),
            capabilities
        ));
        for reference in refs.iter().skip(1) {
            lines.push(format!("{} {}", reference.target_oid().to_hex(), reference.ref_name()));
        }
        lines
    }

    /// Format references for protocol v2's `ls-refs` response.
    pub fn format_v2_ls_refs(&self, refs: &[Reference], symrefs: bool, peel: bool) -> Vec<String> {
        let mut lines = Vec::new();
        for reference in refs {
            let mut line = format!("{} {}", reference.target_oid().to_hex(), reference.ref_name());
            if symrefs {
                if let ProtocolRef::Symbolic { target, .. } = reference {
                    line.push_str(&format!(" symref-target:{target}"));
                }
            }
            lines.push(line);
            if peel {
                if let Some(peeled_oid) = reference.peeled_oid() {
                    lines.push(format!("{} {}^{{}}", peeled_oid.to_hex(), reference.ref_name()));
                }
            }
        }
        lines
    }
}

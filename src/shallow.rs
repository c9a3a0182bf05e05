//! Shallow/deepen frontier computation (SPEC_FULL §4.5).
//!
//! Grounded on `server/negotiation.rs`'s `compute_shallow_commits` family,
//! split out on its own since it has nothing to do with the have/ACK loop.
//! The three `deepen*` forms each walk history a different way: `deepen N`
//! by generation count, `deepen-since T` by commit timestamp, `deepen-not R`
//! by exclusion boundary.

use crate::{
    error::{Error, Result},
    types::{DeepenSpec, NegotiationState},
};
use bstr::{BStr, ByteSlice};
use gix::Repository;
use gix_hash::ObjectId;
use std::collections::{HashMap, HashSet, VecDeque};

/// The new shallow boundary to advertise to the client, expressed as a diff
/// against what it already declared shallow.
#[derive(Debug, Default, Clone)]
pub struct ShallowPlan {
    /// Commits to report as newly `shallow`.
    pub new_shallows: HashSet<ObjectId>,
    /// Commits the client had declared shallow that are no longer boundary
    /// commits and should be reported as `unshallow`.
    pub unshallows: HashSet<ObjectId>,
    /// The complete shallow boundary after this plan is applied.
    pub shallow: HashSet<ObjectId>,
}

impl ShallowPlan {
    fn new(old_shallow: &HashSet<ObjectId>, shallow: HashSet<ObjectId>) -> Self {
        let new_shallows: HashSet<_> = shallow.difference(old_shallow).copied().collect();
        let unshallows: HashSet<_> = old_shallow.difference(&shallow).copied().collect();
        debug_assert!(
            new_shallows.is_disjoint(&unshallows),
            "a commit cannot be both newly shallow and newly unshallow in the same plan"
        );
        Self { new_shallows, unshallows, shallow }
    }
}

/// Compute the shallow plan for a negotiation, dispatching on the client's
/// `deepen*` request. With no `deepen` request the existing shallow boundary
/// is carried forward unchanged.
pub fn compute_shallow_plan(repository: &Repository, state: &NegotiationState) -> Result<ShallowPlan> {
    let any_commit_want = state.wants.iter().any(|&want| repository.find_commit(want).is_ok());
    let shallow = match &state.deepen {
        Some(DeepenSpec::Depth(depth)) => compute_depth_shallow(repository, *depth, &state.wants)?,
        Some(DeepenSpec::Since(since)) => {
            let (shallow, selected) = compute_time_shallow(repository, *since, &state.wants)?;
            if any_commit_want && selected == 0 {
                return Err(no_commits_selected());
            }
            shallow
        }
        Some(DeepenSpec::Not(excludes)) => {
            let (shallow, selected) = compute_exclude_shallow(repository, excludes, &state.wants)?;
            if any_commit_want && selected == 0 {
                return Err(no_commits_selected());
            }
            shallow
        }
        None => state.shallow.clone(),
    };
    Ok(ShallowPlan::new(&state.shallow, shallow))
}

fn no_commits_selected() -> Error {
    Error::Shallow {
        message: "No commits selected for shallow request".to_string(),
    }
}

fn compute_depth_shallow(repository: &Repository, depth: u32, wants: &HashSet<ObjectId>) -> Result<HashSet<ObjectId>> {
    let mut shallow = HashSet::new();
    for &want in wants {
        if repository.find_commit(want).is_ok() {
            collect_shallow_at_depth(repository, want, depth, &mut shallow)?;
        }
    }
    Ok(shallow)
}

/// Breadth-first walk tracking the shortest known depth to each commit;
/// once a commit's depth reaches `max_depth` it becomes a shallow boundary
/// and its parents are not enqueued.
fn collect_shallow_at_depth(
    repository: &Repository,
    start: ObjectId,
    max_depth: u32,
    shallow: &mut HashSet<ObjectId>,
) -> Result<()> {
    let mut depths: HashMap<ObjectId, u32> = HashMap::new();
    let mut queue = VecDeque::new();
    depths.insert(start, 0);
    queue.push_back(start);

    while let Some(oid) = queue.pop_front() {
        let depth = depths[&oid];
        if depth >= max_depth {
            shallow.insert(oid);
            continue;
        }
        let commit = match repository.find_commit(oid) {
            Ok(commit) => commit,
            Err(_) => continue,
        };
        let parent_depth = depth + 1;
        for parent_id in commit.parent_ids() {
            let parent_id = parent_id.detach();
            if let Some(&existing_depth) = depths.get(&parent_id) {
                if existing_depth <= parent_depth {
                    continue;
                }
            }
            depths.insert(parent_id, parent_depth);
            queue.push_back(parent_id);
        }
    }
    Ok(())
}

fn compute_time_shallow(
    repository: &Repository,
    since: gix_date::Time,
    wants: &HashSet<ObjectId>,
) -> Result<(HashSet<ObjectId>, usize)> {
    let mut shallow = HashSet::new();
    let mut selected = 0usize;
    for &want in wants {
        if repository.find_commit(want).is_ok() {
            selected += collect_shallow_since(repository, want, since, &mut shallow)?;
        }
    }
    Ok((shallow, selected))
}

/// Breadth-first walk that stops descending into a branch as soon as it
/// reaches a commit older than `since`, marking that commit shallow. Returns
/// the number of commits that passed the timestamp test (i.e. would actually
/// be sent), so the caller can detect a `deepen-since` that selects nothing.
fn collect_shallow_since(
    repository: &Repository,
    start: ObjectId,
    since: gix_date::Time,
    shallow: &mut HashSet<ObjectId>,
) -> Result<usize> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);
    visited.insert(start);
    let mut selected = 0usize;

    while let Some(oid) = queue.pop_front() {
        let commit = match repository.find_commit(oid) {
            Ok(commit) => commit,
            Err(_) => continue,
        };
        let commit_time = commit.time().unwrap_or_default();
        if commit_time.seconds < since.seconds {
            shallow.insert(oid);
            continue;
        }
        selected += 1;
        for parent_id in commit.parent_ids() {
            let parent_id = parent_id.detach();
            if visited.insert(parent_id) {
                queue.push_back(parent_id);
            }
        }
    }
    Ok(selected)
}

fn compute_exclude_shallow(
    repository: &Repository,
    excludes: &[bstr::BString],
    wants: &HashSet<ObjectId>,
) -> Result<(HashSet<ObjectId>, usize)> {
    let mut excluded_commits = HashSet::new();
    for exclude in excludes {
        let start = resolve_revision(repository, exclude.as_bstr())?;
        collect_excluded_commits(repository, start, &mut excluded_commits)?;
    }

    let mut shallow = HashSet::new();
    let mut selected = 0usize;
    for &want in wants {
        if repository.find_commit(want).is_ok() {
            selected += find_boundary_commits(repository, want, &excluded_commits, &mut shallow)?;
        }
    }
    Ok((shallow, selected))
}

fn resolve_revision(repository: &Repository, spec: &BStr) -> Result<ObjectId> {
    if let Ok(oid) = ObjectId::from_hex(spec) {
        return Ok(oid);
    }
    repository
        .rev_parse_single(spec)
        .map(|id| id.detach())
        .map_err(|e| Error::Shallow { message: format!("cannot resolve deepen-not target {spec}: {e}") })
}

fn collect_excluded_commits(repository: &Repository, start: ObjectId, excluded: &mut HashSet<ObjectId>) -> Result<()> {
    let mut queue = VecDeque::new();
    queue.push_back(start);
    excluded.insert(start);

    while let Some(oid) = queue.pop_front() {
        let commit = match repository.find_commit(oid) {
            Ok(commit) => commit,
            Err(_) => continue,
        };
        for parent_id in commit.parent_ids() {
            let parent_id = parent_id.detach();
            if excluded.insert(parent_id) {
                queue.push_back(parent_id);
            }
        }
    }
    Ok(())
}

/// Breadth-first walk from a want that stops expanding past excluded
/// commits; any visited commit with at least one excluded parent becomes a
/// shallow boundary (marked on the child side of the cut, not the excluded
/// parent itself). Returns the number of non-excluded commits visited, so
/// the caller can detect a `deepen-not` that excludes the want itself and
/// therefore selects nothing.
fn find_boundary_commits(
    repository: &Repository,
    start: ObjectId,
    excluded: &HashSet<ObjectId>,
    shallow: &mut HashSet<ObjectId>,
) -> Result<usize> {
    if excluded.contains(&start) {
        return Ok(0);
    }
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);
    visited.insert(start);
    let mut selected = 0usize;

    while let Some(oid) = queue.pop_front() {
        let commit = match repository.find_commit(oid) {
            Ok(commit) => commit,
            Err(_) => continue,
        };
        selected += 1;
        let mut has_excluded_parent = false;
        for parent_id in commit.parent_ids() {
            let parent_id = parent_id.detach();
            if excluded.contains(&parent_id) {
                has_excluded_parent = true;
                continue;
            }
            if visited.insert(parent_id) {
                queue.push_back(parent_id);
            }
        }
        if has_excluded_parent {
            shallow.insert(oid);
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(b: u8) -> ObjectId {
        ObjectId::from_bytes_or_panic(&[b; 20])
    }

    #[test]
    fn plan_partitions_new_and_unshallow_disjointly() {
        let old: HashSet<_> = [oid(1), oid(2)].into_iter().collect();
        let new: HashSet<_> = [oid(2), oid(3)].into_iter().collect();
        let plan = ShallowPlan::new(&old, new);
        assert_eq!(plan.new_shallows, [oid(3)].into_iter().collect());
        assert_eq!(plan.unshallows, [oid(1)].into_iter().collect());
        assert!(plan.new_shallows.is_disjoint(&plan.unshallows));
    }

    #[test]
    fn plan_is_empty_when_boundary_unchanged() {
        let old: HashSet<_> = [oid(1)].into_iter().collect();
        let plan = ShallowPlan::new(&old, old.clone());
        assert!(plan.new_shallows.is_empty());
        assert!(plan.unshallows.is_empty());
    }
}

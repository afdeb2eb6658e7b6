//! Three-way merge for profile records.
//!
//! Given a base (last mutually-agreed synced snapshot, possibly absent), a
//! local snapshot, and a remote snapshot, produces a deterministic merged
//! record. Merge never fails.
//!
//! Scalar fields: only-one-side-changed takes that side; both-changed takes
//! the side with the later `updated_at`, remote winning ties. The household
//! membership set uses set algebra instead: additions and removals from
//! either side are honored independently.

use std::collections::BTreeSet;

use crate::domain::profile::Profile;

/// Base/local/remote snapshots of one profile.
#[derive(Debug, Clone)]
pub struct ThreeWaySnapshot {
    pub base: Option<Profile>,
    pub local: Profile,
    pub remote: Profile,
}

/// Resolve the snapshot into a merged profile.
pub fn merge_profiles(snapshot: &ThreeWaySnapshot) -> Profile {
    let ThreeWaySnapshot {
        base,
        local,
        remote,
    } = snapshot;

    // Remote wins ties: local only prevails when strictly newer.
    let local_wins = local.updated_at > remote.updated_at;

    let display_name = merge_scalar(
        base.as_ref().map(|b| &b.display_name),
        &local.display_name,
        &remote.display_name,
        local_wins,
    );
    let email = merge_scalar(
        base.as_ref().map(|b| &b.email),
        &local.email,
        &remote.email,
        local_wins,
    );
    let avatar_url = merge_scalar(
        base.as_ref().map(|b| &b.avatar_url),
        &local.avatar_url,
        &remote.avatar_url,
        local_wins,
    );

    let households = merge_membership(
        base.as_ref().map(|b| &b.households),
        &local.households,
        &remote.households,
    );

    Profile {
        id: local.id.clone(),
        display_name,
        email,
        avatar_url,
        households,
        created_at: local.created_at.min(remote.created_at),
        updated_at: local.updated_at.max(remote.updated_at),
    }
}

/// Whether two profiles carry the same content, ignoring timestamps. Used to
/// decide push-merged vs adopt-remote-as-baseline.
pub fn content_equal(a: &Profile, b: &Profile) -> bool {
    a.id == b.id
        && a.display_name == b.display_name
        && a.email == b.email
        && a.avatar_url == b.avatar_url
        && a.households == b.households
}

fn merge_scalar<T: Clone + PartialEq>(
    base: Option<&T>,
    local: &T,
    remote: &T,
    local_wins: bool,
) -> T {
    let picked = match base {
        Some(base) => {
            let local_changed = local != base;
            let remote_changed = remote != base;
            match (local_changed, remote_changed) {
                (false, false) => base,
                (true, false) => local,
                (false, true) => remote,
                (true, true) if local == remote => local,
                (true, true) => {
                    if local_wins {
                        local
                    } else {
                        remote
                    }
                }
            }
        }
        // No agreed ancestor: identical values are trivially merged,
        // divergent ones fall back to last-writer-wins.
        None => {
            if local == remote || local_wins {
                local
            } else {
                remote
            }
        }
    };
    picked.clone()
}

/// Set reconciliation for household membership: `base` minus the union of
/// both sides' removals, plus the union of both sides' additions.
fn merge_membership(
    base: Option<&BTreeSet<String>>,
    local: &BTreeSet<String>,
    remote: &BTreeSet<String>,
) -> BTreeSet<String> {
    let empty = BTreeSet::new();
    let base = base.unwrap_or(&empty);

    let local_added = local.difference(base);
    let remote_added = remote.difference(base);
    let local_removed: BTreeSet<&String> = base.difference(local).collect();
    let remote_removed: BTreeSet<&String> = base.difference(remote).collect();

    let mut merged: BTreeSet<String> = base
        .iter()
        .filter(|id| !local_removed.contains(id) && !remote_removed.contains(id))
        .cloned()
        .collect();
    merged.extend(local_added.cloned());
    merged.extend(remote_added.cloned());
    merged
}

// ============================================================================
// Tests
// ============================================================================

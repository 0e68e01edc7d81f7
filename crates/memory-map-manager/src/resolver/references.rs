//! Expansion of `reference` entries.
//!
//! An enum, bitfield or typedef with `reference: other` starts with the
//! members of `other`, which may itself reference another entry.

use std::collections::BTreeMap;

use tracing::trace;

use crate::error::{Error, Result};
use crate::model::raw::Inherits;

/// Prepend referenced members to every entry that has a reference.
///
/// # Errors
///
/// Returns an error if a reference names a missing entry or the chain of
/// references loops.
pub(crate) fn expand<T: Inherits>(kind: &'static str, entries: &mut BTreeMap<String, T>) -> Result<()> {
    let snapshot = entries.clone();

    for (name, entry) in entries.iter_mut() {
        let mut chain: Vec<&T> = Vec::new();
        let mut visited = vec![name.as_str()];
        let mut next = entry.reference();

        while let Some(target) = next {
            if visited.contains(&target) {
                return Err(Error::Unresolved {
                    kind: "references",
                    names: vec![name.clone()],
                    detail: format!(" in {kind} (loop through {target})"),
                });
            }
            let referenced = snapshot.get(target).ok_or_else(|| Error::Unresolved {
                kind: "references",
                names: vec![name.clone()],
                detail: format!(" in {kind} ({target} is not defined)"),
            })?;
            visited.push(target);
            chain.push(referenced);
            next = referenced.reference();
        }

        if chain.is_empty() {
            continue;
        }
        trace!(entry = %name, depth = chain.len(), "Expanding reference");
        let members = chain
            .iter()
            .rev()
            .flat_map(|referenced| referenced.members().iter().cloned())
            .chain(entry.members().iter().cloned())
            .collect();
        entry.set_members(members);
    }
    Ok(())
}

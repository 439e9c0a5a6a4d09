use crate::metadata::Change;

/// Local and remote change sets split into conflict candidates and
/// pass-through changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    /// `(local, remote)` changes touching the same row.
    pub pairs: Vec<(Change, Change)>,
    pub unmatched_local: Vec<Change>,
    pub unmatched_remote: Vec<Change>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && self.unmatched_local.is_empty() && self.unmatched_remote.is_empty()
    }
}

/// Pairs changes by `(table, primary key)`. Any two changes to the same row
/// form a pair, even when they carry identical content.
pub fn match_changes(mut local: Vec<Change>, mut remote: Vec<Change>) -> MatchResult {
    local.sort_by(Change::cmp_key);
    remote.sort_by(Change::cmp_key);

    let mut partners: Vec<Option<Change>> = vec![None; local.len()];
    let mut unmatched_remote = Vec::new();

    for change in remote {
        match local.binary_search_by(|probe| probe.cmp_key(&change)) {
            Ok(idx) if partners[idx].is_none() => partners[idx] = Some(change),
            _ => unmatched_remote.push(change),
        }
    }

    let mut pairs = Vec::new();
    let mut unmatched_local = Vec::new();
    for (change, partner) in local.into_iter().zip(partners) {
        match partner {
            Some(remote) => pairs.push((change, remote)),
            None => unmatched_local.push(change),
        }
    }

    MatchResult { pairs, unmatched_local, unmatched_remote }
}

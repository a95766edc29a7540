//! Failure collection for per-group reconciliation.

use std::collections::HashSet;
use std::hash::Hash;

/// Collects the failed results that belong to one group.
///
/// A result is kept when `is_failure` holds and its key is in `expected`.
/// Results are de-duplicated by key with the first failure winning, and the
/// original order is preserved.
pub fn collect_group_failures<'a, R, K, FK, FF>(
    results: impl IntoIterator<Item = &'a R>,
    expected: &HashSet<K>,
    key: FK,
    is_failure: FF,
) -> Vec<&'a R>
where
    R: 'a,
    K: Eq + Hash + Copy,
    FK: Fn(&R) -> K,
    FF: Fn(&R) -> bool,
{
    let mut seen = HashSet::new();
    let mut failures = Vec::new();

    for result in results {
        if !is_failure(result) {
            continue;
        }
        let id = key(result);
        if expected.contains(&id) && seen.insert(id) {
            failures.push(result);
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug, PartialEq)]
    struct Res {
        id: u64,
        failed: bool,
        reason: &'static str,
    }

    fn res(id: u64, failed: bool, reason: &'static str) -> Res {
        Res { id, failed, reason }
    }

    #[test]
    fn test_only_in_group_failures_are_collected() {
        let expected: HashSet<u64> = (1..=5).collect();
        let results = vec![
            res(1, false, ""),
            res(2, true, "quota"),
            res(3, false, ""),
            res(4, true, "capacity"),
            res(5, false, ""),
            res(99, true, "other group"),
        ];

        let failures = collect_group_failures(&results, &expected, |r| r.id, |r| r.failed);
        let ids: Vec<_> = failures.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn test_first_failure_wins_per_id() {
        let expected: HashSet<u64> = [7].into_iter().collect();
        let results = vec![res(7, true, "first"), res(7, true, "second")];

        let failures = collect_group_failures(&results, &expected, |r| r.id, |r| r.failed);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].reason, "first");
    }

    #[rstest]
    #[case(vec![], 0)]
    #[case(vec![(1, false)], 0)]
    #[case(vec![(1, true), (2, true), (1, true)], 2)]
    fn test_failure_counts(#[case] raw: Vec<(u64, bool)>, #[case] expected_count: usize) {
        let expected: HashSet<u64> = (1..=3).collect();
        let results: Vec<_> = raw.into_iter().map(|(id, f)| res(id, f, "")).collect();
        let failures = collect_group_failures(&results, &expected, |r| r.id, |r| r.failed);
        assert_eq!(failures.len(), expected_count);
    }
}

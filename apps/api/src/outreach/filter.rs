//! Filter stage: drop candidates that were already contacted.

use std::collections::HashSet;

use crate::outreach::candidate::{Candidate, DedupScope};

/// Returns the candidates none of whose ledger keys appear in `seen`, in input order.
///
/// `seen` is the union of the user's history keys and the ledger keys. A key
/// repeated later in the same batch is dropped too, so one run never drafts two
/// messages for the same organization. Pure: `seen` is never mutated.
pub fn filter_new(
    candidates: Vec<Candidate>,
    seen: &HashSet<String>,
    scope: DedupScope,
) -> Vec<Candidate> {
    let mut batch_keys: HashSet<String> = HashSet::new();

    candidates
        .into_iter()
        .filter(|candidate| {
            let keys = candidate.ledger_keys(scope);
            let fresh = keys
                .iter()
                .all(|k| !seen.contains(k) && !batch_keys.contains(k));
            if fresh {
                batch_keys.extend(keys);
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outreach::candidate::email_candidate;

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn orgs(candidates: &[Candidate]) -> Vec<&str> {
        candidates
            .iter()
            .map(|c| c.organization_name.as_str())
            .collect()
    }

    #[test]
    fn test_drops_previously_contacted_domain() {
        let candidates = vec![
            email_candidate("Acme", Some("Jane"), "jane@acme.com"),
            email_candidate("Beta", None, "hr@beta.com"),
        ];
        let kept = filter_new(candidates, &keys(&["acme.com"]), DedupScope::PerChannel);
        assert_eq!(orgs(&kept), vec!["Beta"]);
    }

    #[test]
    fn test_preserves_order_of_survivors() {
        let candidates = vec![
            email_candidate("D", None, "a@d.com"),
            email_candidate("A", None, "a@a.com"),
            email_candidate("C", None, "a@c.com"),
            email_candidate("B", None, "a@b.com"),
        ];
        let kept = filter_new(candidates, &keys(&["c.com"]), DedupScope::PerChannel);
        assert_eq!(orgs(&kept), vec!["D", "A", "B"]);
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let candidates = vec![
            email_candidate("Acme", None, "a@acme.com"),
            email_candidate("Beta", None, "b@beta.com"),
            email_candidate("Acme Again", None, "c@ACME.com"),
        ];
        let seen = keys(&["beta.com"]);
        let once = filter_new(candidates, &seen, DedupScope::PerChannel);
        let twice = filter_new(once.clone(), &seen, DedupScope::PerChannel);
        assert_eq!(once, twice);
        assert_eq!(orgs(&once), vec!["Acme"]);
    }

    #[test]
    fn test_shared_scope_checks_org_key_too() {
        let candidates = vec![email_candidate("Acme Solar", None, "hr@acmesolar.com")];
        let seen = keys(&["acme solar"]);
        assert_eq!(
            filter_new(candidates.clone(), &seen, DedupScope::PerChannel).len(),
            1
        );
        assert!(filter_new(candidates, &seen, DedupScope::Shared).is_empty());
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        assert!(filter_new(Vec::new(), &keys(&["x.com"]), DedupScope::PerChannel).is_empty());
    }
}

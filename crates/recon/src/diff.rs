use crate::model::SubdomainRecord;
use serde::Serialize;
use std::collections::BTreeSet;

/// Hostnames that appeared, disappeared or stayed between two scans of the
/// same target.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ResultDiff {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

pub fn diff_results(previous: &[SubdomainRecord], current: &[SubdomainRecord]) -> ResultDiff {
    let previous: BTreeSet<&str> = previous.iter().map(|record| record.hostname.as_str()).collect();
    let current: BTreeSet<&str> = current.iter().map(|record| record.hostname.as_str()).collect();

    ResultDiff {
        added: current.difference(&previous).map(|host| host.to_string()).collect(),
        removed: previous.difference(&current).map(|host| host.to_string()).collect(),
        unchanged: current.intersection(&previous).map(|host| host.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(hosts: &[&str]) -> Vec<SubdomainRecord> {
        hosts
            .iter()
            .map(|host| SubdomainRecord::new(host.to_string()))
            .collect()
    }

    #[test]
    fn detects_changes() {
        let previous = records(&["a.example.com", "b.example.com", "c.example.com"]);
        let current = records(&["d.example.com", "b.example.com", "a.example.com"]);

        let diff = diff_results(&previous, &current);

        assert_eq!(diff.added, vec!["d.example.com"]);
        assert_eq!(diff.removed, vec!["c.example.com"]);
        assert_eq!(diff.unchanged, vec!["a.example.com", "b.example.com"]);
        assert!(diff.has_changes());
    }

    #[test]
    fn same_results_have_no_change() {
        let diff = diff_results(&records(&["a.example.com"]), &records(&["a.example.com"]));
        assert!(!diff.has_changes());
        assert!(diff_results(&[], &[]).unchanged.is_empty());
    }
}

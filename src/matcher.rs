use std::collections::HashMap;

use crate::error::Warning;
use crate::record::{Record, RecordSet};

/// One unit of comparison work. Tasks are independent of each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonTask {
    Matched { key: String, a: Record, b: Record },
    OnlyInFirst { key: String, a: Record },
    OnlyInSecond { key: String, b: Record },
}

impl ComparisonTask {
    pub fn key(&self) -> &str {
        match self {
            Self::Matched { key, .. }
            | Self::OnlyInFirst { key, .. }
            | Self::OnlyInSecond { key, .. } => key,
        }
    }
}

#[derive(Debug, Default)]
pub struct MatchPlan {
    pub tasks: Vec<ComparisonTask>,
    /// One entry per key that repeats within a single record set.
    pub duplicates: Vec<Warning>,
}

impl MatchPlan {
    pub fn matched_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t, ComparisonTask::Matched { .. }))
            .count()
    }
}

/// Key -> record for one side. Later occurrences overwrite earlier ones.
struct KeyIndex<'a> {
    order: Vec<&'a str>,
    latest: HashMap<&'a str, &'a Record>,
    counts: HashMap<&'a str, usize>,
}

impl<'a> KeyIndex<'a> {
    fn build(set: &'a RecordSet, key_field: &str) -> Self {
        let mut index = KeyIndex {
            order: Vec::with_capacity(set.len()),
            latest: HashMap::with_capacity(set.len()),
            counts: HashMap::new(),
        };
        for record in &set.records {
            let key = record.get(key_field).unwrap_or("");
            let seen = index.counts.entry(key).or_insert(0);
            if *seen == 0 {
                index.order.push(key);
            }
            *seen += 1;
            index.latest.insert(key, record);
        }
        index
    }

    fn duplicates(&self, label: &str) -> impl Iterator<Item = Warning> + '_ {
        let label = label.to_string();
        self.order.iter().filter_map(move |key| {
            let n = self.counts[key];
            (n > 1).then(|| Warning::DuplicateKey {
                label: label.clone(),
                key: key.to_string(),
                occurrences: n,
            })
        })
    }
}

/// Classify every distinct key of `a` ∪ `b` into exactly one task.
///
/// Keys are compared exactly (case-sensitive). Tasks come out in
/// first-seen order of `a`, then the keys only `b` has, in `b` order.
pub fn plan(a: &RecordSet, b: &RecordSet, key_field: &str) -> MatchPlan {
    let left = KeyIndex::build(a, key_field);
    let right = KeyIndex::build(b, key_field);

    let mut tasks = Vec::with_capacity(left.order.len() + right.order.len());

    for key in &left.order {
        let rec_a = left.latest[key].clone();
        match right.latest.get(key) {
            Some(rec_b) => tasks.push(ComparisonTask::Matched {
                key: key.to_string(),
                a: rec_a,
                b: (*rec_b).clone(),
            }),
            None => tasks.push(ComparisonTask::OnlyInFirst {
                key: key.to_string(),
                a: rec_a,
            }),
        }
    }

    for key in &right.order {
        if !left.latest.contains_key(key) {
            tasks.push(ComparisonTask::OnlyInSecond {
                key: key.to_string(),
                b: right.latest[key].clone(),
            });
        }
    }

    let duplicates = left
        .duplicates(&a.label)
        .chain(right.duplicates(&b.label))
        .collect();

    MatchPlan { tasks, duplicates }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, amount: &str) -> Record {
        Record::from_pairs([("name", name), ("amount", amount)])
    }

    fn set(label: &str, records: Vec<Record>) -> RecordSet {
        RecordSet::new(label, records)
    }

    #[test]
    fn classifies_three_ways() {
        let a = set("A", vec![rec("sys1", "10"), rec("sys2", "5")]);
        let b = set("B", vec![rec("sys1", "20"), rec("sys3", "7")]);
        let p = plan(&a, &b, "name");

        assert_eq!(p.tasks.len(), 3);
        assert_eq!(
            p.tasks[0],
            ComparisonTask::Matched {
                key: "sys1".into(),
                a: rec("sys1", "10"),
                b: rec("sys1", "20"),
            }
        );
        assert!(matches!(&p.tasks[1], ComparisonTask::OnlyInFirst { key, .. } if key == "sys2"));
        assert!(matches!(&p.tasks[2], ComparisonTask::OnlyInSecond { key, .. } if key == "sys3"));
        assert_eq!(p.matched_count(), 1);
        assert!(p.duplicates.is_empty());
    }

    #[test]
    fn keys_are_case_sensitive() {
        let a = set("A", vec![rec("PRD", "1")]);
        let b = set("B", vec![rec("prd", "1")]);
        let p = plan(&a, &b, "name");
        assert_eq!(p.matched_count(), 0);
        assert_eq!(p.tasks.len(), 2);
    }

    #[test]
    fn empty_sides() {
        let empty = set("B", vec![]);
        let p = plan(&set("A", vec![rec("sys1", "1")]), &empty, "name");
        assert!(matches!(&p.tasks[..], [ComparisonTask::OnlyInFirst { .. }]));

        let p = plan(&set("A", vec![]), &set("B", vec![rec("sys2", "1")]), "name");
        assert!(matches!(&p.tasks[..], [ComparisonTask::OnlyInSecond { .. }]));

        let p = plan(&set("A", vec![]), &set("B", vec![]), "name");
        assert!(p.tasks.is_empty());
    }

    #[test]
    fn duplicate_key_last_write_wins_and_is_flagged() {
        let a = set("Version A", vec![rec("sys1", "10"), rec("sys1", "99")]);
        let b = set("Version B", vec![rec("sys1", "99")]);
        let p = plan(&a, &b, "name");

        assert_eq!(p.tasks.len(), 1);
        match &p.tasks[0] {
            ComparisonTask::Matched { a, .. } => assert_eq!(a.get("amount"), Some("99")),
            other => panic!("expected matched task, got {other:?}"),
        }
        assert_eq!(
            p.duplicates,
            vec![Warning::DuplicateKey {
                label: "Version A".into(),
                key: "sys1".into(),
                occurrences: 2,
            }]
        );
    }

    #[test]
    fn one_task_per_distinct_key() {
        let a = set("A", vec![rec("x", "1"), rec("y", "1"), rec("x", "2")]);
        let b = set("B", vec![rec("y", "1"), rec("z", "1"), rec("z", "3")]);
        let p = plan(&a, &b, "name");
        let mut keys: Vec<_> = p.tasks.iter().map(|t| t.key().to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["x", "y", "z"]);
        assert_eq!(p.duplicates.len(), 2);
    }
}

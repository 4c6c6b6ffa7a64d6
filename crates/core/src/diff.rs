//! Field-level diffs between two versions of a record, for human review.
//!
//! Pure functions, no I/O. The output order is clinical, not
//! alphabetical: a reviewer reads the encounter top to bottom the way
//! the note is written.

use serde_json::Value;

use emr_types::{ChangeKind, DiffReport, FieldChange, RecordData};

/// The EMR note's sections, in reading order. This list also defines
/// membership: the diff reports these fields and nothing else.
pub const CANONICAL_FIELD_ORDER: [&str; 7] = [
    "complaints",
    "history",
    "exam",
    "diagnosis",
    "treatment",
    "recommendations",
    "notes",
];

/// Computes the change set between two versions of record content.
///
/// Absent fields and explicit nulls are both "not present", so clearing
/// a section reads as a removal. Unchanged fields are omitted. Values are
/// compared structurally but reported flattened; composites are not
/// diffed recursively.
pub fn compute_changes(from: &RecordData, to: &RecordData) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for field in CANONICAL_FIELD_ORDER {
        let old = present(from.get(field));
        let new = present(to.get(field));
        let change = match (old, new) {
            (None, None) => continue,
            (None, Some(added)) => FieldChange {
                field: field.to_owned(),
                kind: ChangeKind::Added,
                old_value: None,
                new_value: Some(flatten_value(added)),
            },
            (Some(removed), None) => FieldChange {
                field: field.to_owned(),
                kind: ChangeKind::Removed,
                old_value: Some(flatten_value(removed)),
                new_value: None,
            },
            (Some(before), Some(after)) => {
                if before == after {
                    continue;
                }
                FieldChange {
                    field: field.to_owned(),
                    kind: ChangeKind::Modified,
                    old_value: Some(flatten_value(before)),
                    new_value: Some(flatten_value(after)),
                }
            }
        };
        changes.push(change);
    }
    changes
}

/// Builds the report served to the compare view.
pub fn build_report(from_version: u64, to_version: u64, changes: Vec<FieldChange>) -> DiffReport {
    let summary = match changes.len() {
        0 => format!("no changes between v{from_version} and v{to_version}"),
        1 => format!("1 field changed between v{from_version} and v{to_version}"),
        n => format!("{n} fields changed between v{from_version} and v{to_version}"),
    };
    DiffReport { from_version, to_version, summary, changes }
}

/// Flattens any field value into a single display string.
///
/// Lists read as comma-separated items, sub-objects as `key: value`
/// pairs. Good enough for a clinician's compare view, which is the whole
/// intent; structure-aware diffing is deliberately out.
pub fn flatten_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(flatten_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| format!("{key}: {}", flatten_value(value)))
            .collect::<Vec<_>>()
            .join("; "),
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, Value)]) -> RecordData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn changes_come_back_in_clinical_order() {
        let from = data(&[("notes", json!("old note")), ("complaints", json!("cough"))]);
        let to = data(&[
            ("notes", json!("new note")),
            ("complaints", json!("cough, fever")),
            ("diagnosis", json!("flu")),
        ]);

        let fields: Vec<String> = compute_changes(&from, &to)
            .into_iter()
            .map(|c| c.field)
            .collect();
        assert_eq!(fields, vec!["complaints", "diagnosis", "notes"]);
    }

    #[test]
    fn classifies_added_removed_and_modified() {
        let from = data(&[("exam", json!("unremarkable")), ("treatment", json!("rest"))]);
        let to = data(&[("exam", json!("mild wheeze")), ("diagnosis", json!("asthma"))]);

        let changes = compute_changes(&from, &to);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].field, "exam");
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert_eq!(changes[1].field, "diagnosis");
        assert_eq!(changes[1].kind, ChangeKind::Added);
        assert_eq!(changes[2].field, "treatment");
        assert_eq!(changes[2].kind, ChangeKind::Removed);
        assert_eq!(changes[2].old_value.as_deref(), Some("rest"));
        assert_eq!(changes[2].new_value, None);
    }

    #[test]
    fn unchanged_and_unlisted_fields_are_omitted() {
        let from = data(&[("notes", json!("same")), ("billingCode", json!("A10"))]);
        let to = data(&[("notes", json!("same")), ("billingCode", json!("B20"))]);
        assert!(compute_changes(&from, &to).is_empty());
    }

    #[test]
    fn explicit_null_reads_as_removed() {
        let from = data(&[("recommendations", json!("follow up in a week"))]);
        let to = data(&[("recommendations", json!(null))]);

        let changes = compute_changes(&from, &to);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Removed);
    }

    #[test]
    fn composite_values_flatten_to_readable_strings() {
        assert_eq!(
            flatten_value(&json!({"bp": "120/80", "pulse": 72})),
            "bp: 120/80; pulse: 72"
        );
        assert_eq!(
            flatten_value(&json!(["paracetamol", "ibuprofen"])),
            "paracetamol, ibuprofen"
        );
        assert_eq!(flatten_value(&json!(37.5)), "37.5");
    }

    #[test]
    fn report_summary_counts_changes() {
        let from = data(&[("notes", json!("a"))]);
        let to = data(&[("notes", json!("b"))]);
        let report = build_report(2, 5, compute_changes(&from, &to));
        assert_eq!(report.from_version, 2);
        assert_eq!(report.to_version, 5);
        assert_eq!(report.summary, "1 field changed between v2 and v5");

        let empty = build_report(2, 2, Vec::new());
        assert_eq!(empty.summary, "no changes between v2 and v2");
    }
}

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::record::ContentRecord;

const DESCRIPTION_LIMIT: usize = 80;

/// Projection of one universe's content hierarchy.
///
/// `lines` is the indented tree; `type_counts` tallies every input record's
/// type tag, including records the tree never reaches (a dangling parent
/// pointer hides a record from the tree but not from the tally).
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyRender {
    pub lines: Vec<String>,
    pub type_counts: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

/// Truncate a description for display: at most 80 characters, with `...`
/// appended only when something was cut. Counts characters, not bytes.
pub fn truncate_description(description: &str) -> String {
    if description.chars().count() <= DESCRIPTION_LIMIT {
        return description.to_string();
    }
    let mut truncated: String = description.chars().take(DESCRIPTION_LIMIT).collect();
    truncated.push_str("...");
    truncated
}

/// Render the tree implied by the records' parent pointers.
///
/// Children keep their input order within each parent, so callers must fetch
/// ordered by `(parent_id, order_index)`; this function groups, it does not
/// sort. Traversal is an explicit-stack pre-order walk: no recursion depth
/// limit, and a visited set guarantees termination even when the input
/// violates the forest invariant (duplicate identifiers, self-parenting).
/// Skipped re-visits are reported in `warnings`.
pub fn render_hierarchy(records: &[ContentRecord]) -> HierarchyRender {
    let mut children_by_parent: BTreeMap<Option<String>, Vec<&ContentRecord>> = BTreeMap::new();
    for record in records {
        children_by_parent
            .entry(record.parent_id.clone())
            .or_default()
            .push(record);
    }

    let mut lines = Vec::new();
    let mut warnings = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<(&ContentRecord, usize)> = Vec::new();

    if let Some(roots) = children_by_parent.get(&None) {
        for record in roots.iter().rev() {
            stack.push((*record, 0));
        }
    }

    while let Some((record, depth)) = stack.pop() {
        if !visited.insert(record.id.as_str()) {
            warnings.push(format!(
                "skipped already-rendered node: {} ({})",
                record.title, record.id
            ));
            continue;
        }

        let children = children_by_parent.get(&Some(record.id.clone()));
        let marker = if children.is_some() { '+' } else { '-' };
        let indent = "  ".repeat(depth);
        lines.push(format!(
            "{indent}{marker} {} ({})",
            record.title, record.item_type
        ));
        if let Some(description) = &record.description {
            lines.push(format!(
                "{indent}   └─ {}",
                truncate_description(description)
            ));
        }

        if let Some(children) = children {
            for child in children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
    }

    let mut type_counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        *type_counts.entry(record.item_type.clone()).or_insert(0) += 1;
    }

    HierarchyRender {
        lines,
        type_counts,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::{render_hierarchy, truncate_description};
    use crate::record::ContentRecord;

    fn record(id: &str, title: &str, parent: Option<&str>, item_type: &str) -> ContentRecord {
        ContentRecord {
            id: id.to_string(),
            title: title.to_string(),
            universe_id: "u-1".to_string(),
            parent_id: parent.map(ToString::to_string),
            order_index: 0,
            slug: None,
            item_type: item_type.to_string(),
            description: None,
        }
    }

    #[test]
    fn renders_nested_tree_and_hides_orphans_from_lines_only() {
        // B is a root, C hangs under B, D points at a parent that does not exist.
        let records = vec![
            record("b", "Season One", None, "season"),
            record("c", "Rose", Some("b"), "episode"),
            record("d", "Lost Tape", Some("missing"), "episode"),
        ];
        let render = render_hierarchy(&records);

        assert_eq!(
            render.lines,
            vec!["+ Season One (season)", "  - Rose (episode)"]
        );
        assert_eq!(render.type_counts["episode"], 2);
        assert_eq!(render.type_counts["season"], 1);
        assert!(render.warnings.is_empty());
    }

    #[test]
    fn siblings_keep_input_order() {
        let records = vec![
            record("a", "Root", None, "arc"),
            record("b", "First", Some("a"), "episode"),
            record("c", "Second", Some("a"), "episode"),
            record("d", "Third", Some("a"), "episode"),
        ];
        let render = render_hierarchy(&records);
        assert_eq!(
            render.lines,
            vec![
                "+ Root (arc)",
                "  - First (episode)",
                "  - Second (episode)",
                "  - Third (episode)",
            ]
        );
    }

    #[test]
    fn pre_order_descends_before_next_sibling() {
        let records = vec![
            record("a", "Root", None, "arc"),
            record("b", "Left", Some("a"), "season"),
            record("d", "Right", Some("a"), "season"),
            record("c", "Left Child", Some("b"), "episode"),
        ];
        let render = render_hierarchy(&records);
        assert_eq!(
            render.lines,
            vec![
                "+ Root (arc)",
                "  + Left (season)",
                "    - Left Child (episode)",
                "  - Right (season)",
            ]
        );
    }

    #[test]
    fn description_lines_are_indented_and_truncated() {
        let mut with_description = record("a", "Root", None, "arc");
        with_description.description = Some("x".repeat(81));
        let render = render_hierarchy(&[with_description]);

        assert_eq!(render.lines.len(), 2);
        assert_eq!(render.lines[1], format!("   └─ {}...", "x".repeat(80)));
    }

    #[test]
    fn truncation_boundary_is_exactly_eighty() {
        let eighty = "a".repeat(80);
        assert_eq!(truncate_description(&eighty), eighty);

        let eighty_one = "a".repeat(81);
        assert_eq!(truncate_description(&eighty_one), format!("{}...", "a".repeat(80)));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let long = "é".repeat(81);
        let truncated = truncate_description(&long);
        assert_eq!(truncated.chars().count(), 83);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn cyclic_component_is_unreachable_but_still_tallied() {
        // A two-node parent cycle never reaches the root traversal; like an
        // orphan it is invisible in the tree yet present in the tally.
        let records = vec![
            record("a", "Root", None, "arc"),
            record("b", "Ouroboros", Some("c"), "episode"),
            record("c", "Serpent", Some("b"), "episode"),
        ];
        let render = render_hierarchy(&records);
        assert_eq!(render.lines, vec!["- Root (arc)"]);
        assert_eq!(render.type_counts["episode"], 2);
    }

    #[test]
    fn duplicate_identifiers_terminate_with_warning() {
        // Two records share an id; the second encounter is skipped, not
        // re-expanded, so traversal always terminates.
        let records = vec![
            record("a", "First Copy", None, "arc"),
            record("a", "Second Copy", None, "arc"),
            record("b", "Child", Some("a"), "episode"),
        ];
        let render = render_hierarchy(&records);
        assert_eq!(render.lines.len(), 2);
        assert_eq!(render.warnings.len(), 1);
        assert!(render.warnings[0].contains("Second Copy"));
    }

    #[test]
    fn type_tally_is_sorted_by_tag() {
        let records = vec![
            record("a", "Z", None, "zeta"),
            record("b", "A", None, "alpha"),
            record("c", "M", None, "midway"),
        ];
        let render = render_hierarchy(&records);
        let tags: Vec<&str> = render.type_counts.keys().map(String::as_str).collect();
        assert_eq!(tags, vec!["alpha", "midway", "zeta"]);
    }

    #[test]
    fn empty_input_renders_nothing() {
        let render = render_hierarchy(&[]);
        assert!(render.lines.is_empty());
        assert!(render.type_counts.is_empty());
    }
}

//! Index renames detected from a rebuild plan.

use tracing::warn;

use crate::request::TableDescriptor;

const NEW_PREFIX: &str = ".NEW.";

/// Pairs of `(old_tag, new_tag)` whose statistics must follow a rename.
///
/// New indexes built during the change carry a `.NEW.` prefix that is dropped
/// before comparing. An old index still carrying the prefix means a previous
/// change never finished its rename, and nothing after it can be trusted.
pub(crate) fn find_index_renames(
    new_table: &TableDescriptor,
    old_table: &TableDescriptor,
) -> Vec<(String, String)> {
    let Some(plan) = &new_table.plan else {
        return Vec::new();
    };

    let mut renames = Vec::new();
    for (position, index) in new_table.indexes.iter().enumerate() {
        let Some(old_position) = plan.index_plan.get(position).copied().flatten() else {
            continue;
        };
        let Some(old_index) = old_table.indexes.get(old_position) else {
            continue;
        };

        let new_tag = index.tag.strip_prefix(NEW_PREFIX).unwrap_or(&index.tag);
        if old_index.tag.starts_with(NEW_PREFIX) {
            warn!(
                table = %old_table.name,
                tag = %old_index.tag,
                "old index still carries the .NEW. prefix, skipping rename check"
            );
            break;
        }

        if old_index.tag != new_tag {
            renames.push((old_index.tag.clone(), new_tag.to_string()));
        }
    }

    renames
}

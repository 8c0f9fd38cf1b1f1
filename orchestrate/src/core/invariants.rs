//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::types::TasksFile;

/// Check semantic invariants of a tasks file:
/// - No duplicate ids
/// - `lastId >= max(id)`
pub fn validate_invariants(file: &TasksFile) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for task in &file.tasks {
        if !seen.insert(task.id) {
            errors.push(format!("duplicate task id {}", task.id));
        }
    }

    if let Some(max_id) = file.tasks.iter().map(|task| task.id).max()
        && file.last_id < max_id
    {
        errors.push(format!(
            "lastId {} is below the largest task id {}",
            file.last_id, max_id
        ));
    }

    errors
}

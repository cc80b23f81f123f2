//! Identifier generation for pipelines, stages and items.

use uuid::Uuid;

/// Generates a pipeline id (`pipeline-<uuid v4>`).
#[must_use]
pub fn generate_pipeline_id() -> String {
    format!("pipeline-{}", Uuid::new_v4())
}

/// Generates a stage id (`stage-<uuid v4>`).
#[must_use]
pub fn generate_stage_id() -> String {
    format!("stage-{}", Uuid::new_v4())
}

/// Generates an item id.
///
/// Item ids are UUID v7 so that they sort by creation time.
#[must_use]
pub fn generate_item_id() -> String {
    Uuid::now_v7().to_string()
}

/// Builds the id of the `index`-th item derived from `parent_id`.
#[must_use]
pub fn derived_item_id(parent_id: &str, index: usize) -> String {
    format!("{parent_id}-{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert!(generate_pipeline_id().starts_with("pipeline-"));
        assert!(generate_stage_id().starts_with("stage-"));
    }

    #[test]
    fn test_item_ids_are_v7() {
        let id = generate_item_id();
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn test_derived_item_id() {
        assert_eq!(derived_item_id("abc", 2), "abc-2");
    }
}

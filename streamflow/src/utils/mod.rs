//! Id generation and timestamp helpers.

mod ids;
pub mod timestamps;

pub use ids::{derived_item_id, generate_item_id, generate_pipeline_id, generate_stage_id};
pub use timestamps::{iso_timestamp, now_utc, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}

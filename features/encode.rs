//! Integer encoding of categorical columns.

use crate::features::frame::{Column, ColumnKind, LongitudinalFrame};
use itertools::Itertools;
use std::collections::BTreeMap;

pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Sorted category levels per encoded column; a level's index is its code.
pub type CategoryLevels = BTreeMap<String, Vec<String>>;

/// Adds `{name}_encoded` for each named categorical column present.
/// Missing cells become the `"unknown"` level before codes are assigned.
pub fn encode_categoricals(frame: &mut LongitudinalFrame, names: &[String]) -> CategoryLevels {
    let mut levels = CategoryLevels::new();
    for name in names {
        let Some(column) = frame.categorical(name) else {
            continue;
        };
        let labels: Vec<&str> = column
            .values
            .iter()
            .map(|v| v.as_deref().unwrap_or(UNKNOWN_CATEGORY))
            .collect();
        let sorted: Vec<String> = labels
            .iter()
            .copied()
            .unique()
            .sorted()
            .map(str::to_string)
            .collect();
        let codes: Vec<Option<f64>> = labels
            .iter()
            .map(|label| {
                sorted
                    .binary_search_by(|level| level.as_str().cmp(label))
                    .ok()
                    .map(|code| code as f64)
            })
            .collect();

        let encoded = format!("{name}_encoded");
        frame.push_column(Column::new(encoded.clone(), ColumnKind::Encoded, codes));
        levels.insert(encoded, sorted);
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DemographicTable, ObservationRow, ObservationTable};
    use chrono::NaiveDate;

    #[test]
    fn codes_follow_sorted_levels_with_unknown_for_missing() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 4, d).unwrap();
        let mut missing = ObservationRow::new("C", day(1)).with_value("age", 1.0);
        missing.categorical.insert("gender".to_string(), None);
        let rows = vec![
            ObservationRow::new("A", day(1)).with_category("gender", "M"),
            ObservationRow::new("B", day(1)).with_category("gender", "F"),
            missing,
        ];
        let mut frame =
            LongitudinalFrame::from_tables(&ObservationTable::from_rows(rows), &DemographicTable::default())
                .unwrap();
        let levels = encode_categoricals(&mut frame, &["gender".to_string(), "smoking_history".to_string()]);

        assert_eq!(levels["gender_encoded"], vec!["F", "M", "unknown"]);
        assert_eq!(
            frame.values("gender_encoded").unwrap(),
            &[Some(1.0), Some(0.0), Some(2.0)]
        );
        assert!(!frame.has_column("smoking_history_encoded"));
    }
}

//! Summary tables over diagnoses and ED stays

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::join::{JoinKind, hash_join};
use crate::schema::columns::{ICD_CODE, ICD_VERSION, INTIME, LONG_TITLE, OUTTIME, STAY_ID, SUBJECT_ID};
use crate::schema::date_utils::parse_timestamp;
use crate::utils::arrow_utils::{column, has_column, select_existing, string_values, with_column};

/// Attach dictionary titles to diagnoses on the ICD code, and version when
/// both sides have it
pub(crate) fn with_titles(diagnoses: &RecordBatch, dictionary: &RecordBatch) -> Result<RecordBatch> {
    let mut keys = vec![ICD_CODE.to_string()];
    if has_column(diagnoses, ICD_VERSION) && has_column(dictionary, ICD_VERSION) {
        keys.push(ICD_VERSION.to_string());
    }
    let mut wanted = keys.clone();
    wanted.push(LONG_TITLE.to_string());
    let dictionary = select_existing(dictionary, &wanted)?;
    hash_join(diagnoses, &dictionary, &keys, JoinKind::Left)
}

/// Diagnosis frequency per (code, title), most frequent first
///
/// Rows whose code or title is missing are not counted. Ties keep the order
/// in which the pair first appears.
pub fn top_diagnoses(diagnoses: &RecordBatch, dictionary: &RecordBatch) -> Result<RecordBatch> {
    let titled = with_titles(diagnoses, dictionary)?;
    let codes = string_values(column(&titled, ICD_CODE, "diagnoses")?)?;
    let titles = string_values(column(&titled, LONG_TITLE, "diagnoses")?)?;

    let mut order: Vec<(String, String)> = Vec::new();
    let mut counts: FxHashMap<(String, String), i64> = FxHashMap::default();
    for pair in codes.into_iter().zip(titles) {
        let (Some(code), Some(title)) = pair else {
            continue;
        };
        let key = (code, title);
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }

    let mut ranked: Vec<((String, String), i64)> = order
        .into_iter()
        .map(|key| {
            let count = counts[&key];
            (key, count)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let code_array: StringArray = ranked.iter().map(|((c, _), _)| Some(c.as_str())).collect();
    let title_array: StringArray = ranked.iter().map(|((_, t), _)| Some(t.as_str())).collect();
    let frequency: Int64Array = ranked.iter().map(|(_, n)| Some(*n)).collect();

    Ok(RecordBatch::try_from_iter(vec![
        (ICD_CODE, Arc::new(code_array) as ArrayRef),
        (LONG_TITLE, Arc::new(title_array) as ArrayRef),
        ("frequency", Arc::new(frequency) as ArrayRef),
    ])?)
}

/// Hours between in-time and out-time of each ED stay
///
/// A stay with an unparsable time gets a null length.
pub fn length_of_stay(ed_stays: &RecordBatch) -> Result<RecordBatch> {
    let intimes = string_values(column(ed_stays, INTIME, "ed_stays")?)?;
    let outtimes = string_values(column(ed_stays, OUTTIME, "ed_stays")?)?;

    let hours: Float64Array = intimes
        .iter()
        .zip(&outtimes)
        .map(|(intime, outtime)| {
            let intime = parse_timestamp(intime.as_deref()?)?;
            let outtime = parse_timestamp(outtime.as_deref()?)?;
            Some((outtime - intime).num_seconds() as f64 / 3600.0)
        })
        .collect();

    let ids = select_existing(ed_stays, &[SUBJECT_ID.to_string(), STAY_ID.to_string()])?;
    with_column(&ids, "los_hours", Arc::new(hours))
}

/// ED visits per calendar day of arrival, oldest day first
pub fn visit_trend(ed_stays: &RecordBatch) -> Result<RecordBatch> {
    let intimes = string_values(column(ed_stays, INTIME, "ed_stays")?)?;

    let mut per_day: BTreeMap<chrono::NaiveDate, i64> = BTreeMap::new();
    for intime in intimes.iter().flatten() {
        if let Some(ts) = parse_timestamp(intime) {
            *per_day.entry(ts.date()).or_insert(0) += 1;
        }
    }

    let days: StringArray = per_day
        .keys()
        .map(|day| Some(day.format("%Y-%m-%d").to_string()))
        .collect();
    let visits: Int64Array = per_day.values().map(|n| Some(*n)).collect();

    Ok(RecordBatch::try_from_iter(vec![
        ("visit_day", Arc::new(days) as ArrayRef),
        ("visits", Arc::new(visits) as ArrayRef),
    ])?)
}

//! Merging per-page extraction results into one record per document.
//!
//! A pure, order-dependent fold. Error markers (and anything else that is not
//! a page mapping) are skipped, so a failed page neither contributes keys nor
//! blanks out keys merged from earlier pages.

use crate::config::MergeStrategy;
use crate::output::{ExtractionResult, MergedRecord};
use serde_json::{Map, Value};

/// Merge page results, in page order, into a fresh record.
pub fn merge_pages<'a, I>(pages: I, strategy: MergeStrategy) -> MergedRecord
where
    I: IntoIterator<Item = &'a ExtractionResult>,
{
    merge_into(MergedRecord::new(), pages, strategy)
}

/// Continue merging `pages` on top of an existing record.
///
/// `merge_into(record, [], _)` returns `record` unchanged.
pub fn merge_into<'a, I>(mut acc: MergedRecord, pages: I, strategy: MergeStrategy) -> MergedRecord
where
    I: IntoIterator<Item = &'a ExtractionResult>,
{
    for sections in pages.into_iter().filter_map(ExtractionResult::sections) {
        match strategy {
            MergeStrategy::LastWriteWins => {
                for (key, value) in sections {
                    acc.insert(key.clone(), value.clone());
                }
            }
            MergeStrategy::Deep => deep_merge(&mut acc, sections),
        }
    }
    acc
}

fn deep_merge(acc: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        let kept = match (acc.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(next)) => {
                deep_merge(existing, next);
                true
            }
            (Some(Value::Array(existing)), Value::Array(next)) => {
                existing.extend(next.iter().cloned());
                true
            }
            // A null on a later page means "blank on this page", not "erase".
            (Some(existing), Value::Null) => !existing.is_null(),
            _ => false,
        };
        if !kept {
            acc.insert(key.clone(), value.clone());
        }
    }
}

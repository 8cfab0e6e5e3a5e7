/// Join of extracted code rows against the fetched rate table.
///
/// Pure and deterministic: output has one record per input record, in input order.
/// Lookup uses the shared `CodeKey` normalization, first for an exact key and then for
/// the longest listed heading that prefixes the key (tariffs often publish a rate for
/// `1234 56` that covers every `1234 56 xxx x` subheading).
use crate::code::CodeKey;
use crate::model::{CodeRecord, MatchStatus, MergedRecord, RateRecord, RateTable, UnitTable};

pub fn merge<I>(codes: I, rates: &RateTable, units: &UnitTable) -> Vec<MergedRecord>
where
    I: IntoIterator<Item = CodeRecord>,
{
    codes
        .into_iter()
        .map(|record| merge_one(record, rates, units))
        .collect()
}

fn merge_one(record: CodeRecord, rates: &RateTable, units: &UnitTable) -> MergedRecord {
    let unit_code = units.code_for(&record.unit).unwrap_or_default().to_string();

    let (rate, rate_key, status) = match record.key.as_ref() {
        None => (None, None, MatchStatus::CodeMalformed),
        Some(key) => match lookup(key, rates) {
            Some(found) => (
                Some(found.rate.clone()),
                Some(found.key.clone()),
                MatchStatus::Matched,
            ),
            None => (None, None, MatchStatus::RateMissing),
        },
    };

    MergedRecord {
        code: record.code,
        description: record.description,
        unit: record.unit,
        unit_code,
        rate,
        rate_key,
        status,
    }
}

/// Exact key first, then the longest prefix present in the table.
pub fn lookup<'a>(key: &CodeKey, rates: &'a RateTable) -> Option<&'a RateRecord> {
    rates
        .get(key.as_str())
        .or_else(|| key.prefixes().find_map(|prefix| rates.get(prefix)))
}

/// Translation of duty-rate expressions from the Uzbek source into Russian.
///
/// The portal writes rates like `20, лекин ҳар бир килограмми учун 0,3 АҚШ долларидан
/// кам бўлмаган миқдорда`; the report wants `20, но не менее 0,3 долл. США за килограмм`.
/// Only the handful of shapes that appear in the tariff are recognised; anything else
/// passes through with currency names replaced.
use std::sync::LazyLock;

use regex::Regex;

static STARRED_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d,\s*]+\*+$").expect("valid regex"));

static MIN_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(.+),\s*лекин\s*(ҳар бир|ҳар)\s*(.*?)\s*дан кам бўлмаган миқдорда")
        .expect("valid regex")
});

static MIN_AMOUNT_GENERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(.*),\s*лекин\s*(.*)\s*дан кам эмас").expect("valid regex")
});

static ADDITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)([\d\s.,]+)\s*\+\s*([\d\s.,]+)\s*(долл\. США)\s*ҳар бир\s*(.+)\s*учун(\**)")
        .expect("valid regex")
});

/// Per-unit minimum phrases: (pattern capturing the amount, Russian unit).
static UNIT_PHRASES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"ҳар бир килограмми учун ([\d\s.,]+)\s*долл\. США", "килограмм"),
        (r"ҳар бир донаси учун ([\d\s.,]+)\s*долл\. США", "штуку"),
        (r"ҳар бир литри учун ([\d\s.,]+)\s*долл\. США", "литр"),
        (r"ҳар бир жуфти учун ([\d\s.,]+)\s*долл\. США", "пару"),
        (r"ҳар бир м2 учун ([\d\s.,]+)\s*долл\. США", "м2"),
        (r"ҳар 1000 донаси учун ([\d\s.,]+)\s*долл\. США", "1000 штук"),
    ]
    .into_iter()
    .map(|(pattern, unit)| (Regex::new(pattern).expect("valid regex"), unit))
    .collect()
});

/// Translate one rate expression. Empty input gives an empty string.
pub fn translate_rate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    // "10*", "20***": footnote-marked plain values
    if STARRED_VALUE.is_match(trimmed) {
        return trimmed.to_string();
    }

    let text = text
        .replace("АҚШ доллари", "долл. США")
        .replace("АҚШ долл.", "долл. США")
        .replace("/кг", " за кг");

    if let Some(caps) = MIN_AMOUNT.captures(&text) {
        let base = caps[1].trim();
        let phrase = format!("{} {}", &caps[2], &caps[3]);

        for (pattern, unit) in UNIT_PHRASES.iter() {
            if let Some(m) = pattern.captures(&phrase) {
                let amount = m[1].trim();
                return format!("{base}, но не менее {amount} долл. США за {unit}");
            }
        }

        if let Some(generic) = MIN_AMOUNT_GENERIC.captures(&text) {
            return format!("{}, но не менее {}", generic[1].trim(), generic[2].trim());
        }

        let loose = phrase.replace("ҳар бир", "за").replace("учун", "");
        return format!("{base}, но не менее {}", collapse_spaces(&loose));
    }

    if let Some(caps) = ADDITIVE.captures(&text) {
        let first = caps[1].trim();
        let second = caps[2].trim();
        let unit = caps[4].trim();
        let stars = &caps[5];
        let unit = if unit.contains("куб. см.") {
            "за куб. см."
        } else {
            unit
        };
        return format!("{first} + {second} долл. США {unit}{stars}");
    }

    text.trim().to_string()
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Locale-tolerant number parsing for values read out of OCR text.

/// Parse the first number in `raw`, accepting both `,` and `.` as either a
/// decimal point or a grouping separator.
///
/// - Both present: whichever occurs last is the decimal point.
/// - One kind present: it groups thousands when the last group has exactly
///   three digits (`1,234` is 1234), otherwise it is a decimal point
///   (`12,5` is 12.5). Repeated with a short last group (`1,2,3`) it would
///   be several decimal points, so the input is rejected.
/// - A separator directly before the first digit is a decimal point
///   (`.5` and `,5` are 0.5).
///
/// Returns `None` when there is no digit or the separators are ambiguous.
pub fn parse_locale_number(raw: &str) -> Option<f64> {
    let run = numeric_run(raw)?;
    let (negative, digits) = match run.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, run.strip_prefix('+').unwrap_or(run)),
    };

    if let Some(fraction) = digits.strip_prefix([',', '.']) {
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: f64 = format!("0.{fraction}").parse().ok()?;
        return Some(if negative { -value } else { value });
    }

    let last_comma = digits.rfind(',');
    let last_dot = digits.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (None, None) => digits.to_string(),
        (Some(c), Some(d)) => {
            let (decimal, grouping) = if c > d { (',', '.') } else { ('.', ',') };
            if digits.matches(decimal).count() > 1 {
                return None;
            }
            digits.replace(grouping, "").replace(decimal, ".")
        }
        (Some(_), None) => single_separator(digits, ',')?,
        (None, Some(_)) => single_separator(digits, '.')?,
    };

    let value: f64 = normalized.parse().ok()?;
    Some(if negative { -value } else { value })
}

fn single_separator(digits: &str, sep: char) -> Option<String> {
    let groups: Vec<&str> = digits.split(sep).collect();
    let last_is_thousands = groups.len() > 1 && groups.last().is_some_and(|g| g.len() == 3);
    if last_is_thousands {
        Some(digits.replace(sep, ""))
    } else if groups.len() == 2 {
        Some(digits.replace(sep, "."))
    } else {
        None
    }
}

/// First run of digits and separators, with an optional leading separator
/// and sign directly in front, and trailing separators removed.
fn numeric_run(raw: &str) -> Option<&str> {
    let first_digit = raw.find(|c: char| c.is_ascii_digit())?;
    let mut start = first_digit;
    if raw[..start].ends_with([',', '.']) {
        start -= 1;
    }
    if raw[..start].ends_with(['-', '+']) {
        start -= 1;
    }
    let len = raw[first_digit..]
        .find(|c: char| !(c.is_ascii_digit() || c == ',' || c == '.'))
        .unwrap_or(raw.len() - first_digit);
    let run = &raw[start..first_digit + len];
    Some(run.trim_end_matches([',', '.']))
}

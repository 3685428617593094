use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];
const OFFSET_TIME_FORMATS: &[&str] = &["%H:%M:%S%.f%:z", "%H:%M:%S%.f%z", "%H:%M%:z"];

fn normalize_zulu(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.strip_suffix('Z').or_else(|| trimmed.strip_suffix('z')) {
        Some(rest) => format!("{}+00:00", rest),
        None => trimmed.to_string(),
    }
}

/// Permissive datetime parsing: RFC 3339, space or `T` separator, optional
/// fraction, optional offset, or a bare date (midnight).
/// Returns the local wall time plus the offset when one was given.
pub fn parse_datetime(text: &str) -> Option<(NaiveDateTime, Option<FixedOffset>)> {
    let text = normalize_zulu(text);

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some((dt.naive_local(), Some(*dt.offset())));
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&text, format) {
            return Some((dt.naive_local(), Some(*dt.offset())));
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&text, format) {
            return Some((dt, None));
        }
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| (dt, None))
}

/// Time of day with optional offset; a full datetime is accepted and its time part kept
pub fn parse_time(text: &str) -> Option<(NaiveTime, Option<FixedOffset>)> {
    let normalized = normalize_zulu(text);

    for format in OFFSET_TIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(
            &format!("1970-01-01 {}", normalized),
            &format!("%Y-%m-%d {}", format),
        ) {
            return Some((parsed.time(), Some(*parsed.offset())));
        }
    }
    for format in NAIVE_TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(&normalized, format) {
            return Some((time, None));
        }
    }
    parse_datetime(text).map(|(dt, offset)| (dt.time(), offset))
}

/// ISO-8601 duration text, e.g. `P1DT2H3M4.5S`; zero is `P0D`
pub fn format_duration(duration: &TimeDelta) -> String {
    if *duration == TimeDelta::zero() {
        return "P0D".to_string();
    }

    let negative = *duration < TimeDelta::zero();
    let total = duration.abs();
    let mut seconds = total.num_seconds();
    let micros = (total - TimeDelta::seconds(seconds)).num_microseconds().unwrap_or(0);

    let days = seconds / 86_400;
    seconds %= 86_400;
    let hours = seconds / 3_600;
    seconds %= 3_600;
    let minutes = seconds / 60;
    seconds %= 60;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push('P');
    if days > 0 {
        out.push_str(&format!("{}D", days));
    }
    if hours > 0 || minutes > 0 || seconds > 0 || micros > 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes > 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if seconds > 0 || micros > 0 {
            if micros > 0 {
                let fraction = format!("{:06}", micros);
                out.push_str(&format!("{}.{}S", seconds, fraction.trim_end_matches('0')));
            } else {
                out.push_str(&format!("{}S", seconds));
            }
        }
    }
    out
}

/// Parse an ISO-8601 duration with week, day, hour, minute and second designators.
/// Year and month designators are rejected since their length is not fixed.
pub fn parse_duration(text: &str) -> Option<TimeDelta> {
    let text = text.trim();
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let rest = rest.strip_prefix('P').or_else(|| rest.strip_prefix('p'))?;
    if rest.is_empty() {
        return None;
    }

    let mut total_micros: i128 = 0;
    let mut in_time = false;
    let mut number = String::new();
    let mut seen_component = false;

    for c in rest.chars() {
        match c {
            '0'..='9' | '.' | ',' => number.push(if c == ',' { '.' } else { c }),
            'T' | 't' => {
                if in_time || !number.is_empty() {
                    return None;
                }
                in_time = true;
            }
            designator => {
                if number.is_empty() {
                    return None;
                }
                let amount: f64 = number.parse().ok()?;
                number.clear();
                let unit_seconds: f64 = match (in_time, designator.to_ascii_uppercase()) {
                    (false, 'W') => 604_800.0,
                    (false, 'D') => 86_400.0,
                    (true, 'H') => 3_600.0,
                    (true, 'M') => 60.0,
                    (true, 'S') => 1.0,
                    _ => return None,
                };
                total_micros += (amount * unit_seconds * 1_000_000.0).round() as i128;
                seen_component = true;
            }
        }
    }

    if !number.is_empty() || !seen_component {
        return None;
    }

    let micros = i64::try_from(total_micros).ok()?;
    let delta = TimeDelta::microseconds(micros);
    Some(if negative { -delta } else { delta })
}

use chrono::Duration;
use thiserror::Error;

/// 每月天数（近似）
pub const DAYS_IN_MONTH: i64 = 30;
/// 每年天数（近似）
pub const DAYS_IN_YEAR: i64 = DAYS_IN_MONTH * 12;

const MILLIS_IN_SECOND: i64 = 1000;
const MILLIS_IN_MINUTE: i64 = 60 * MILLIS_IN_SECOND;
const MILLIS_IN_HOUR: i64 = 60 * MILLIS_IN_MINUTE;
const MILLIS_IN_DAY: i64 = 24 * MILLIS_IN_HOUR;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("Unable to convert \"{0}\" to a duration")]
    Invalid(String),
    #[error("Duration \"{0}\" is out of range")]
    Overflow(String),
}

/// 解析 ISO 8601 时长，例如 `P1D`、`PT30M`、`-P1W`
///
/// 年按 360 天、月按 30 天计算。
pub fn parse_duration(text: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(text.to_string());

    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let rest = rest.strip_prefix('P').ok_or_else(invalid)?;

    let starts_with_digit = |s: &str| s.starts_with(|c: char| c.is_ascii_digit());
    let has_component = starts_with_digit(rest)
        || rest.strip_prefix('T').is_some_and(starts_with_digit);
    if !has_component {
        return Err(invalid());
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, time),
        None => (rest, ""),
    };

    let mut days: i64 = 0;
    for (designator, amount) in scan(date_part, false).ok_or_else(invalid)? {
        let amount = amount.whole;
        let component = match designator {
            'Y' => amount.checked_mul(DAYS_IN_YEAR),
            'M' => amount.checked_mul(DAYS_IN_MONTH),
            'W' => amount.checked_mul(7),
            'D' => Some(amount),
            _ => return Err(invalid()),
        };
        days = component
            .and_then(|c| days.checked_add(c))
            .ok_or_else(|| DurationError::Overflow(text.to_string()))?;
    }

    let overflow = || DurationError::Overflow(text.to_string());
    let mut millis = days.checked_mul(MILLIS_IN_DAY).ok_or_else(overflow)?;
    for (designator, amount) in scan(time_part, true).ok_or_else(invalid)? {
        let component = match designator {
            'H' => amount.whole.checked_mul(MILLIS_IN_HOUR),
            'M' => amount.whole.checked_mul(MILLIS_IN_MINUTE),
            'S' => amount
                .whole
                .checked_mul(MILLIS_IN_SECOND)
                .and_then(|ms| ms.checked_add(amount.fraction_millis)),
            _ => return Err(invalid()),
        };
        millis = component
            .and_then(|c| millis.checked_add(c))
            .ok_or_else(overflow)?;
    }

    if negative {
        millis = -millis;
    }

    Ok(Duration::milliseconds(millis))
}

#[derive(Debug, Clone, Copy)]
struct Amount {
    whole: i64,
    fraction_millis: i64,
}

/// 按顺序扫描 `<数字><单位>` 片段，单位不能重复或乱序
fn scan(segment: &str, is_time: bool) -> Option<Vec<(char, Amount)>> {
    let mut found = Vec::new();
    let mut last_slot: Option<usize> = None;
    let mut rest = segment;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let whole: i64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];

        let mut fraction_millis = 0;
        if let Some(after_dot) = rest.strip_prefix('.') {
            let fraction_end = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            if fraction_end == 0 {
                return None;
            }
            let fraction = &after_dot[..fraction_end];
            let padded: String = fraction.chars().chain("000".chars()).take(3).collect();
            fraction_millis = padded.parse().ok()?;
            rest = &after_dot[fraction_end..];
            if !is_time || !rest.starts_with('S') {
                return None;
            }
        }

        let designator = rest.chars().next()?;
        rest = &rest[designator.len_utf8()..];

        let slot = match (is_time, designator) {
            (false, 'Y') | (true, 'H') => 0,
            (false, 'M') | (true, 'M') => 1,
            (false, 'D') | (false, 'W') | (true, 'S') => 2,
            _ => return None,
        };
        if last_slot.is_some_and(|last| slot <= last) {
            return None;
        }
        last_slot = Some(slot);

        found.push((
            designator,
            Amount {
                whole,
                fraction_millis,
            },
        ));
    }

    Some(found)
}

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

const DATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d", "%d-%b-%Y", "%d %b %Y", "%d %B %Y",
];

const TIME_FORMATS: [&str; 6] = [
    "%H:%M:%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p", "%I:%M:%S%p", "%I:%M%p",
];

/// Parse the free text FMS sheets store in their planned/actual cells.
/// Dates are day first. Returns None for anything that is not a
/// recognizable date, with or without a time.
pub fn parse_fms_datetime(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let text = raw.trim();
    if text.is_empty() || text == "-" || text.eq_ignore_ascii_case("n/a") {
        return None;
    }

    // "2024-01-05T10:00:00" as exported by some sheets
    let text = if text.len() > 10 && text.as_bytes()[10] == b'T' {
        format!("{} {}", &text[..10], &text[11..])
    } else {
        text.to_string()
    };
    let text = text.as_str();

    for date_format in DATE_FORMATS.iter() {
        if let Ok(date) = NaiveDate::parse_from_str(text, date_format) {
            return Some((date, None));
        }
        for time_format in TIME_FORMATS.iter() {
            let format = format!("{} {}", date_format, time_format);
            if let Ok(stamp) = NaiveDateTime::parse_from_str(text, &format) {
                return Some((stamp.date(), Some(stamp.time())));
            }
        }
    }
    None
}

/// Parse a stored date column. Empty or malformed values are absent.
pub fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let text = raw?.trim();
    if text.is_empty() || text.starts_with("0000-00-00") {
        return None;
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_fms_datetime(text).map(|(date, _)| date))
}

/// Parse a stored time column (`HH:MM` or `HH:MM:SS`).
pub fn parse_time(raw: Option<&str>) -> Option<NaiveTime> {
    let text = raw?.trim();
    if text.is_empty() {
        return None;
    }
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn iso_with_and_without_time() {
        assert_eq!(
            parse_fms_datetime("2024-03-05 14:30:00"),
            Some((date(2024, 3, 5), Some(time(14, 30))))
        );
        assert_eq!(
            parse_fms_datetime("2024-03-05T09:15"),
            Some((date(2024, 3, 5), Some(time(9, 15))))
        );
        assert_eq!(parse_fms_datetime(" 2024-03-05 "), Some((date(2024, 3, 5), None)));
    }

    #[test]
    fn day_first_sheet_formats() {
        assert_eq!(parse_fms_datetime("05/03/2024"), Some((date(2024, 3, 5), None)));
        assert_eq!(
            parse_fms_datetime("05/03/2024 2:45 PM"),
            Some((date(2024, 3, 5), Some(time(14, 45))))
        );
        assert_eq!(
            parse_fms_datetime("5-Mar-2024 18:00:00"),
            Some((date(2024, 3, 5), Some(time(18, 0))))
        );
    }

    #[test]
    fn garbage_is_absent() {
        assert_eq!(parse_fms_datetime(""), None);
        assert_eq!(parse_fms_datetime("-"), None);
        assert_eq!(parse_fms_datetime("N/A"), None);
        assert_eq!(parse_fms_datetime("tomorrow"), None);
        assert_eq!(parse_fms_datetime("31/02/2024"), None);
    }

    #[test]
    fn stored_columns() {
        assert_eq!(parse_date(Some("2024-01-02")), Some(date(2024, 1, 2)));
        assert_eq!(parse_date(Some("0000-00-00")), None);
        assert_eq!(parse_date(None), None);
        assert_eq!(parse_time(Some("08:05")), Some(time(8, 5)));
        assert_eq!(parse_time(Some("nonsense")), None);
    }
}

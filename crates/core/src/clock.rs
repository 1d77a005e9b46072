/// Current UTC time as an RFC 3339 string with millisecond precision,
/// e.g. `2025-01-01T00:00:00.000Z`.
///
/// Fixed width, so lexical order matches chronological order.
pub fn now_rfc3339() -> String {
    format_rfc3339(time::OffsetDateTime::now_utc())
}

pub(crate) fn format_rfc3339(at: time::OffsetDateTime) -> String {
    let at = at.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        at.year(),
        at.month() as u8,
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        at.millisecond()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_with_milliseconds() {
        let at = datetime!(2025-03-07 09:05:01.042 UTC);
        assert_eq!(format_rfc3339(at), "2025-03-07T09:05:01.042Z");
    }

    #[test]
    fn normalizes_offset_to_utc() {
        let at = datetime!(2025-03-07 01:00:00 +02:00);
        assert_eq!(format_rfc3339(at), "2025-03-06T23:00:00.000Z");
    }

    #[test]
    fn now_parses_as_rfc3339() {
        let now = now_rfc3339();
        let parsed =
            time::OffsetDateTime::parse(&now, &time::format_description::well_known::Rfc3339);
        assert!(parsed.is_ok(), "{now}");
    }
}

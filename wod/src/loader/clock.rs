/// Parse a clock string such as `20:00`, `:30`, `1:02:03` or `-1:00` into
/// milliseconds. A leading `-` marks a countdown and yields a negative value.
pub fn parse_clock(text: &str) -> Result<i64, String> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    if body.is_empty() {
        return Err("empty clock value".to_string());
    }

    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() > 3 {
        return Err(format!("too many ':' separators in '{}'", trimmed));
    }

    let mut seconds: i64 = 0;
    for part in &parts {
        let value = if part.is_empty() {
            0
        } else {
            part.parse::<i64>()
                .map_err(|_| format!("'{}' is not a clock value", trimmed))?
        };
        if value < 0 {
            return Err(format!("'{}' is not a clock value", trimmed));
        }
        seconds = seconds
            .checked_mul(60)
            .and_then(|s| s.checked_add(value))
            .ok_or_else(|| format!("'{}' is out of range", trimmed))?;
    }

    let ms = seconds
        .checked_mul(1000)
        .ok_or_else(|| format!("'{}' is out of range", trimmed))?;
    Ok(if negative { -ms } else { ms })
}

/// Render milliseconds as `m:ss` (or `h:mm:ss` past an hour).
pub fn format_clock(ms: i64) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let total = ms.unsigned_abs() / 1000;
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{}{}:{:02}:{:02}", sign, h, m, s)
    } else {
        format!("{}{}:{:02}", sign, m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clock_forms() {
        assert_eq!(parse_clock("20:00"), Ok(1_200_000));
        assert_eq!(parse_clock(":30"), Ok(30_000));
        assert_eq!(parse_clock("1:02:03"), Ok(3_723_000));
        assert_eq!(parse_clock("-1:00"), Ok(-60_000));
        assert_eq!(parse_clock("45"), Ok(45_000));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_clock("").is_err());
        assert!(parse_clock("ten").is_err());
        assert!(parse_clock("1:2:3:4").is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(parse_clock("9223372036854775:00").is_err());
        assert!(parse_clock("-9223372036854775807").is_err());
        assert!(parse_clock("153722867280912930:00:00").is_err());
    }

    #[test]
    fn formats_clock() {
        assert_eq!(format_clock(1_200_000), "20:00");
        assert_eq!(format_clock(-30_000), "-0:30");
        assert_eq!(format_clock(3_723_000), "1:02:03");
    }
}

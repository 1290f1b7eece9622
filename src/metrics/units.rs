use crate::metrics::ParseError;

const GB_BYTES: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn percent_used(used: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    round1(used / total * 100.0)
}

pub fn mb_to_gb(mb: f64) -> f64 {
    round1(mb / 1024.0)
}

pub fn kb_to_gb(kb: f64) -> f64 {
    round1(kb / 1024.0 / 1024.0)
}

pub fn bytes_to_gb(bytes: f64) -> f64 {
    round1(bytes / GB_BYTES)
}

pub fn size_to_gb(raw: &str) -> Result<f64, ParseError> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(ParseError::Missing("size value"));
    }
    let boundary = token
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(token.len());
    let (digits, suffix) = token.split_at(boundary);
    let value: f64 = digits
        .trim()
        .replace(',', ".")
        .parse()
        .map_err(|_| ParseError::Number(token.to_string()))?;
    let gb = match suffix.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('K') => value / 1024.0 / 1024.0,
        Some('M') => value / 1024.0,
        Some('G') => value,
        Some('T') => value * 1024.0,
        Some('P') => value * 1024.0 * 1024.0,
        Some('B') | None => value / GB_BYTES,
        Some(other) => return Err(ParseError::Number(format!("{}{}", value, other))),
    };
    Ok(round2(gb))
}

pub fn parse_f64(raw: &str) -> Result<f64, ParseError> {
    raw.trim()
        .replace(',', ".")
        .parse()
        .map_err(|_| ParseError::Number(raw.trim().to_string()))
}

pub fn parse_u64(raw: &str) -> Result<u64, ParseError> {
    raw.trim()
        .parse()
        .map_err(|_| ParseError::Number(raw.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_human_sizes_to_gb() {
        assert_eq!(size_to_gb("10G").unwrap(), 10.0);
        assert_eq!(size_to_gb("2048M").unwrap(), 2.0);
        assert_eq!(size_to_gb("1048576K").unwrap(), 1.0);
        assert_eq!(size_to_gb("1.5T").unwrap(), 1536.0);
        assert_eq!(size_to_gb("0").unwrap(), 0.0);
    }

    #[test]
    fn rejects_garbage_sizes() {
        assert!(size_to_gb("").is_err());
        assert!(size_to_gb("lots").is_err());
    }

    #[test]
    fn percent_guards_zero_total() {
        assert_eq!(percent_used(5.0, 0.0), 0.0);
        assert_eq!(percent_used(8000.0, 16000.0), 50.0);
    }

    #[test]
    fn megabytes_round_to_one_decimal() {
        assert_eq!(mb_to_gb(16000.0), 15.6);
        assert_eq!(kb_to_gb(16655544.0), 15.9);
    }
}

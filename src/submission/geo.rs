/// Parse an ODK geopoint answer, `"lat lng [altitude accuracy]"`, into
/// `(latitude, longitude)`. Out-of-range coordinates are rejected.
pub fn parse_geopoint(answer: &str) -> Option<(f64, f64)> {
    let mut parts = answer.split_whitespace();
    let lat: f64 = parts.next()?.parse().ok()?;
    let lng: f64 = parts.next()?.parse().ok()?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    Some((lat, lng))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_geopoint() {
        assert_eq!(
            parse_geopoint("-1.2625 36.7924 1670.0 25.0"),
            Some((-1.2625, 36.7924))
        );
    }

    #[test]
    fn lat_lng_only() {
        assert_eq!(parse_geopoint("  10 20 "), Some((10.0, 20.0)));
    }

    #[test]
    fn malformed_or_out_of_range() {
        assert_eq!(parse_geopoint(""), None);
        assert_eq!(parse_geopoint("10"), None);
        assert_eq!(parse_geopoint("north east"), None);
        assert_eq!(parse_geopoint("91 0"), None);
        assert_eq!(parse_geopoint("0 181"), None);
    }
}

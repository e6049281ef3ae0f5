use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::ReadingCache;

/// What a POST body yielded for each field. Fields are parsed
/// independently; either may be absent, and they may even come from
/// different formats within the same body.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observation {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
}

impl Observation {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none()
    }
}

/// What to write into a field the payload did not carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartialUpdatePolicy {
    /// Legacy behavior: the missing field is overwritten with 0.0,
    /// discarding whatever the cache held for it.
    #[default]
    ZeroFill,
    /// Keep the previously cached value for the missing field.
    PreserveExisting,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum IngestError {
    /// Declared (or actual) body length exceeds the configured cap. The
    /// body is not parsed.
    #[error("Content too long")]
    BodyTooLarge { declared: usize, limit: usize },
    /// The body read failed or yielded nothing.
    #[error("Failed to receive data")]
    BodyUnreadable,
    /// Neither field could be extracted in either format.
    #[error("Invalid data")]
    Unparsable,
}

/// Parse both fields out of a POST body: quoted-label form first, then the
/// `key=value` form as a per-field fallback.
pub fn parse_observation(body: &str) -> Observation {
    Observation {
        temperature: labeled_field(body, "temperature")
            .or_else(|| form_field(body, "temperature")),
        humidity: labeled_field(body, "humidity").or_else(|| form_field(body, "humidity")),
    }
}

/// Commit an observation to the cache. At least one parsed field commits a
/// full-record update, filling the missing field per `policy`; an empty
/// observation leaves the cache untouched.
pub fn apply_observation(
    cache: &ReadingCache,
    observation: Observation,
    policy: PartialUpdatePolicy,
    now_ms: u64,
) -> Result<(), IngestError> {
    if observation.is_empty() {
        return Err(IngestError::Unparsable);
    }

    let previous = match policy {
        PartialUpdatePolicy::ZeroFill => None,
        PartialUpdatePolicy::PreserveExisting => cache.snapshot(),
    };
    let temperature = observation
        .temperature
        .unwrap_or_else(|| previous.map(|r| r.temperature).unwrap_or(0.0));
    let humidity = observation
        .humidity
        .unwrap_or_else(|| previous.map(|r| r.humidity).unwrap_or(0.0));

    cache.update(temperature, humidity, now_ms);
    Ok(())
}

/// Locate a quoted `"name"`, then the first `:` anywhere after it, then
/// scan a float from there. Finding the label and colon counts as a parse
/// even when the literal is degenerate: total garbage scans to 0.0. That
/// permissiveness matches the wire peers this endpoint has to accept.
fn labeled_field(body: &str, name: &str) -> Option<f32> {
    let needle = format!("\"{name}\"");
    let at = body.find(&needle)?;
    let after = &body[at + needle.len()..];
    let colon = after.find(':')?;
    Some(parse_float_prefix(&after[colon + 1..]))
}

/// Scan `&`-separated `key=value` pairs for `name`. A pair with a
/// non-empty value counts as a parse, degenerate literals included.
fn form_field(body: &str, name: &str) -> Option<f32> {
    body.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then(|| parse_float_prefix(value))
    })
}

/// strtof-style scan: leading whitespace, optional sign, decimal digits
/// with an optional point, optional exponent. Stops at the first byte that
/// cannot extend a valid literal and yields 0.0 when no literal starts at
/// all.
pub fn parse_float_prefix(input: &str) -> f32 {
    let s = input.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(&b'+') | Some(&b'-')) {
        end += 1;
    }

    let mut mantissa_digits = 0;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
        mantissa_digits += 1;
    }
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
            mantissa_digits += 1;
        }
    }
    if mantissa_digits == 0 {
        return 0.0;
    }

    // Exponent only counts when at least one digit follows the marker.
    if matches!(bytes.get(end), Some(&b'e') | Some(&b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(&b'+') | Some(&b'-')) {
            exp_end += 1;
        }
        let exp_digits_at = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_at {
            end = exp_end;
        }
    }

    s[..end].parse::<f32>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReadingSource;
    use pretty_assertions::assert_eq;

    fn cache() -> ReadingCache {
        ReadingCache::new(ReadingSource::Http, 30_000)
    }

    #[test]
    fn float_prefix_scanner_matches_strtof() {
        assert_eq!(parse_float_prefix("23.5"), 23.5);
        assert_eq!(parse_float_prefix("  -4.25"), -4.25);
        assert_eq!(parse_float_prefix("+7"), 7.0);
        assert_eq!(parse_float_prefix(".5xyz"), 0.5);
        assert_eq!(parse_float_prefix("23.5abc"), 23.5);
        assert_eq!(parse_float_prefix("1e2,"), 100.0);
        assert_eq!(parse_float_prefix("1e"), 1.0);
        assert_eq!(parse_float_prefix("1e+"), 1.0);
        assert_eq!(parse_float_prefix("garbage"), 0.0);
        assert_eq!(parse_float_prefix(""), 0.0);
        assert_eq!(parse_float_prefix("-"), 0.0);
        assert_eq!(parse_float_prefix("."), 0.0);
    }

    #[test]
    fn parses_json_style_body() {
        let observation = parse_observation(r#"{"temperature":23.20,"humidity":54.00}"#);

        assert_eq!(observation.temperature, Some(23.2));
        assert_eq!(observation.humidity, Some(54.0));
    }

    #[test]
    fn parses_json_style_body_with_spacing() {
        let observation = parse_observation(r#"{ "temperature" : 21.5 , "humidity" : 48 }"#);

        assert_eq!(observation.temperature, Some(21.5));
        assert_eq!(observation.humidity, Some(48.0));
    }

    #[test]
    fn parses_form_encoded_body() {
        let observation = parse_observation("temperature=18.5&humidity=40.1");

        assert_eq!(observation.temperature, Some(18.5));
        assert_eq!(observation.humidity, Some(40.1));
    }

    #[test]
    fn fields_mix_formats_independently() {
        let observation = parse_observation(r#"{"temperature":20.0}&humidity=55.5"#);

        assert_eq!(observation.temperature, Some(20.0));
        assert_eq!(observation.humidity, Some(55.5));
    }

    #[test]
    fn labeled_garbage_literal_scans_to_zero() {
        // Label plus colon is enough to count as parsed; the degenerate
        // literal decays to 0.0. Documented weak point, not strictness.
        let observation = parse_observation(r#"{"temperature":oops}"#);

        assert_eq!(observation.temperature, Some(0.0));
        assert_eq!(observation.humidity, None);
    }

    #[test]
    fn unparsable_body_yields_empty_observation() {
        assert!(parse_observation("garbage").is_empty());
        assert!(parse_observation("").is_empty());
        assert!(parse_observation("temperature&humidity").is_empty());
        assert!(parse_observation("temperature=").is_empty());
    }

    #[test]
    fn full_observation_updates_cache() {
        let cache = cache();
        let observation = parse_observation(r#"{"temperature":23.20,"humidity":54.00}"#);

        apply_observation(&cache, observation, PartialUpdatePolicy::ZeroFill, 1_000).unwrap();

        assert_eq!(cache.temperature(), 23.2);
        assert_eq!(cache.humidity(), 54.0);
        assert_eq!(cache.last_update_ms(), Some(1_000));
    }

    #[test]
    fn zero_fill_overwrites_missing_field() {
        let cache = cache();
        cache.update(25.0, 80.0, 500);

        let observation = parse_observation(r#"{"humidity":60.0}"#);
        apply_observation(&cache, observation, PartialUpdatePolicy::ZeroFill, 1_000).unwrap();

        // Legacy behavior: the absent temperature clobbers the cached one.
        assert_eq!(cache.temperature(), 0.0);
        assert_eq!(cache.humidity(), 60.0);
    }

    #[test]
    fn preserve_existing_keeps_missing_field() {
        let cache = cache();
        cache.update(25.0, 80.0, 500);

        let observation = parse_observation(r#"{"humidity":60.0}"#);
        apply_observation(
            &cache,
            observation,
            PartialUpdatePolicy::PreserveExisting,
            1_000,
        )
        .unwrap();

        assert_eq!(cache.temperature(), 25.0);
        assert_eq!(cache.humidity(), 60.0);
        assert_eq!(cache.last_update_ms(), Some(1_000));
    }

    #[test]
    fn preserve_existing_on_empty_cache_fills_zero() {
        let cache = cache();

        let observation = parse_observation("humidity=60.0");
        apply_observation(
            &cache,
            observation,
            PartialUpdatePolicy::PreserveExisting,
            1_000,
        )
        .unwrap();

        assert_eq!(cache.temperature(), 0.0);
        assert_eq!(cache.humidity(), 60.0);
    }

    #[test]
    fn unparsable_body_leaves_cache_untouched() {
        let cache = cache();
        cache.update(25.0, 80.0, 500);

        let result = apply_observation(
            &cache,
            parse_observation("garbage"),
            PartialUpdatePolicy::ZeroFill,
            1_000,
        );

        assert_eq!(result, Err(IngestError::Unparsable));
        assert_eq!(cache.temperature(), 25.0);
        assert_eq!(cache.humidity(), 80.0);
        assert_eq!(cache.last_update_ms(), Some(500));
    }

    #[test]
    fn ingest_errors_render_response_messages() {
        assert_eq!(
            IngestError::BodyTooLarge {
                declared: 512,
                limit: 256
            }
            .to_string(),
            "Content too long"
        );
        assert_eq!(IngestError::BodyUnreadable.to_string(), "Failed to receive data");
        assert_eq!(IngestError::Unparsable.to_string(), "Invalid data");
    }
}

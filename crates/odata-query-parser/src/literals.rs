//! Structural literal recognisers
//!
//! Each recogniser matches the literal's shape at the start of the input and
//! returns the matched slice; conversion into a typed value happens separately
//! so that a well-shaped but invalid literal (`2024-13-01`) is reported as a
//! lexical error rather than silently lexed as something else.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use odata_query_ast::{DurationLiteral, LiteralValue, SpatialShape};
use rust_decimal::Decimal;
use std::str::FromStr;
use winnow::ascii::digit1;
use winnow::combinator::{alt, opt};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};
use uuid::Uuid;

type Recognized<'i> = ModalResult<&'i str>;

/// A structural recogniser such as [`guid`] or [`number`]
pub(crate) type Recognizer = for<'i> fn(&mut &'i str) -> Recognized<'i>;

/// Binary literals use base64url; padding is optional
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

fn hex<'i>(count: usize) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    take_while(count, |c: char| c.is_ascii_hexdigit())
}

fn digits<'i>(count: usize) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    take_while(count, |c: char| c.is_ascii_digit())
}

/// `01234567-89ab-cdef-0123-456789abcdef`
pub(crate) fn guid<'i>(input: &mut &'i str) -> Recognized<'i> {
    (hex(8), '-', hex(4), '-', hex(4), '-', hex(4), '-', hex(12))
        .take()
        .parse_next(input)
}

/// `YYYY-MM-DD`
pub(crate) fn date<'i>(input: &mut &'i str) -> Recognized<'i> {
    (digits(4), '-', digits(2), '-', digits(2)).take().parse_next(input)
}

/// `hh:mm[:ss[.fffffff]]`
pub(crate) fn time_of_day<'i>(input: &mut &'i str) -> Recognized<'i> {
    (
        digits(2),
        ':',
        digits(2),
        opt((':', digits(2), opt(('.', take_while(1..=12, |c: char| c.is_ascii_digit()))))),
    )
        .take()
        .parse_next(input)
}

fn offset<'i>(input: &mut &'i str) -> Recognized<'i> {
    alt(("Z", "z", (one_of(['+', '-']), digits(2), ':', digits(2)).take())).parse_next(input)
}

/// `YYYY-MM-DDThh:mm[:ss[.fffffff]](Z|+hh:mm|-hh:mm)`
pub(crate) fn date_time_offset<'i>(input: &mut &'i str) -> Recognized<'i> {
    (date, one_of(['T', 't']), time_of_day, offset)
        .take()
        .parse_next(input)
}

/// `[-]digits[.digits][e[+|-]digits]`, without a type suffix
pub(crate) fn number<'i>(input: &mut &'i str) -> Recognized<'i> {
    (
        opt('-'),
        digit1,
        opt(('.', digit1)),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .parse_next(input)
}

/// Run a recogniser against `input`; returns the matched length
pub(crate) fn recognize(recognizer: Recognizer, input: &str) -> Option<usize> {
    let mut rest = input;
    recognizer(&mut rest).ok().map(|matched| matched.len())
}

pub(crate) fn to_guid(text: &str) -> Option<LiteralValue> {
    Uuid::parse_str(text).ok().map(LiteralValue::Guid)
}

pub(crate) fn to_date(text: &str) -> Option<LiteralValue> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(LiteralValue::Date)
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

pub(crate) fn to_time_of_day(text: &str) -> Option<LiteralValue> {
    parse_time(text).map(LiteralValue::TimeOfDay)
}

pub(crate) fn to_date_time_offset(text: &str) -> Option<LiteralValue> {
    let (date_part, rest) = text.split_at(10);
    let time_and_offset = &rest[1..];
    let offset_start = time_and_offset.find(['Z', 'z', '+', '-'])?;
    let (time_part, offset_part) = time_and_offset.split_at(offset_start);

    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let time = parse_time(time_part)?;
    let offset_seconds = match offset_part {
        "Z" | "z" => 0,
        signed => {
            let sign = if signed.starts_with('-') { -1 } else { 1 };
            let hours: i32 = signed[1..3].parse().ok()?;
            let minutes: i32 = signed[4..6].parse().ok()?;
            sign * (hours * 3600 + minutes * 60)
        }
    };
    let offset = FixedOffset::east_opt(offset_seconds)?;
    date.and_time(time)
        .and_local_timezone(offset)
        .single()
        .map(|value: DateTime<FixedOffset>| LiteralValue::DateTimeOffset(value))
}

/// Type a numeric literal from its digits and optional suffix
pub(crate) fn to_number(text: &str, suffix: Option<char>) -> Option<LiteralValue> {
    let has_fraction = text.contains('.');
    let has_exponent = text.contains(['e', 'E']);
    match suffix.map(|c| c.to_ascii_uppercase()) {
        Some('L') if !has_fraction && !has_exponent => text.parse().ok().map(LiteralValue::Int64),
        Some('L') => None,
        Some('M') => parse_decimal(text).map(LiteralValue::Decimal),
        Some('D') => text.parse().ok().map(LiteralValue::Double),
        Some('F') => text.parse().ok().map(LiteralValue::Single),
        Some(_) => None,
        None if has_exponent => text.parse().ok().map(LiteralValue::Double),
        None if has_fraction => parse_decimal(text)
            .map(LiteralValue::Decimal)
            .or_else(|| text.parse().ok().map(LiteralValue::Double)),
        None => text
            .parse()
            .ok()
            .map(LiteralValue::Int32)
            .or_else(|| text.parse().ok().map(LiteralValue::Int64))
            .or_else(|| parse_decimal(text).map(LiteralValue::Decimal))
            .or_else(|| text.parse().ok().map(LiteralValue::Double)),
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Body of `duration'...'`: `[-]P[nD][T[nH][nM][n[.n]S]]`
pub(crate) fn to_duration(body: &str) -> Option<LiteralValue> {
    let (negative, rest) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let rest = rest.strip_prefix('P')?;
    let (day_part, time_part) = match rest.split_once('T') {
        Some((days, time)) if !time.is_empty() => (days, Some(time)),
        Some(_) => return None,
        None => (rest, None),
    };

    let mut duration = DurationLiteral {
        negative,
        days: 0,
        hours: 0,
        minutes: 0,
        seconds: Decimal::ZERO,
    };
    if !day_part.is_empty() {
        duration.days = day_part.strip_suffix('D')?.parse().ok()?;
    }
    if day_part.is_empty() && time_part.is_none() {
        return None;
    }

    let mut remaining = time_part.unwrap_or("");
    for (designator, slot) in [('H', 0usize), ('M', 1), ('S', 2)] {
        if let Some(index) = remaining.find(designator) {
            let number = &remaining[..index];
            match slot {
                0 => duration.hours = number.parse().ok()?,
                1 => duration.minutes = number.parse().ok()?,
                _ => duration.seconds = Decimal::from_str(number).ok()?,
            }
            remaining = &remaining[index + 1..];
        }
    }
    if !remaining.is_empty() {
        return None;
    }
    Some(LiteralValue::Duration(duration))
}

pub(crate) fn to_binary_base64(body: &str) -> Option<LiteralValue> {
    BASE64URL.decode(body).ok().map(LiteralValue::Binary)
}

/// Body of `X'...'`
pub(crate) fn to_binary_hex(body: &str) -> Option<LiteralValue> {
    if body.len() % 2 != 0 {
        return None;
    }
    (0..body.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(body.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()
        .map(LiteralValue::Binary)
}

/// Body of `geography'...'`/`geometry'...'`: `[SRID=n;]wkt`
pub(crate) fn to_spatial(body: &str, geography: bool) -> Option<LiteralValue> {
    let (srid, wkt) = match body.split_once(';') {
        Some((prefix, wkt)) if prefix.to_ascii_uppercase().starts_with("SRID=") => {
            (Some(prefix[5..].parse().ok()?), wkt)
        }
        _ => (None, body),
    };
    let shape = SpatialShape::from_wkt(wkt);
    // WKT must at least look like `NAME(...)`
    let open = wkt.find('(')?;
    if !wkt.trim_end().ends_with(')') || wkt[..open].trim().is_empty() {
        return None;
    }
    Some(LiteralValue::Spatial {
        geography,
        shape,
        srid,
        wkt: wkt.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(guid, "01234567-89ab-cdef-0123-456789ABCDEF)", Some(36))]
    #[case(guid, "01234567-89ab-cdef-0123", None)]
    #[case(date, "2024-01-15 rest", Some(10))]
    #[case(time_of_day, "12:30", Some(5))]
    #[case(time_of_day, "12:30:15.125", Some(12))]
    #[case(date_time_offset, "2024-01-15T12:30:00Z", Some(20))]
    #[case(date_time_offset, "2024-01-15T12:30+02:00", Some(22))]
    #[case(date_time_offset, "2024-01-15T12:30", None)]
    #[case(number, "-12.5e3)", Some(7))]
    #[case(number, "42L", Some(2))]
    fn test_recognizers(
        #[case] recognizer: Recognizer,
        #[case] input: &str,
        #[case] expected: Option<usize>,
    ) {
        assert_eq!(recognize(recognizer, input), expected);
    }

    #[rstest]
    #[case("42", None, Some(LiteralValue::Int32(42)))]
    #[case("3000000000", None, Some(LiteralValue::Int64(3_000_000_000)))]
    #[case("42", Some('L'), Some(LiteralValue::Int64(42)))]
    #[case("1.5", None, Some(LiteralValue::Decimal(Decimal::new(15, 1))))]
    #[case("1.5", Some('M'), Some(LiteralValue::Decimal(Decimal::new(15, 1))))]
    #[case("1e3", None, Some(LiteralValue::Double(1000.0)))]
    #[case("2.5", Some('f'), Some(LiteralValue::Single(2.5)))]
    #[case("1.5", Some('L'), None)]
    fn test_number_typing(
        #[case] text: &str,
        #[case] suffix: Option<char>,
        #[case] expected: Option<LiteralValue>,
    ) {
        assert_eq!(to_number(text, suffix), expected);
    }

    #[test]
    fn test_duration() {
        let Some(LiteralValue::Duration(d)) = to_duration("-P1DT2H30M1.5S") else {
            panic!("duration did not parse");
        };
        assert!(d.negative);
        assert_eq!((d.days, d.hours, d.minutes), (1, 2, 30));
        assert_eq!(d.seconds, Decimal::new(15, 1));
        assert_eq!(to_duration("P"), None);
        assert_eq!(to_duration("PT"), None);
        assert_eq!(to_duration("P1DT5X"), None);
    }

    #[test]
    fn test_invalid_calendar_dates_are_rejected() {
        assert_eq!(to_date("2024-13-01"), None);
        assert!(to_date_time_offset("2024-02-29T23:59:59.999+05:30").is_some());
    }

    #[test]
    fn test_binary_bodies() {
        assert_eq!(to_binary_base64("AQID"), Some(LiteralValue::Binary(vec![1, 2, 3])));
        assert_eq!(to_binary_hex("0A0b"), Some(LiteralValue::Binary(vec![10, 11])));
        assert_eq!(to_binary_hex("ABC"), None);
    }

    #[test]
    fn test_spatial_body() {
        let Some(LiteralValue::Spatial { srid, shape, .. }) =
            to_spatial("SRID=4326;POINT(1 2)", true)
        else {
            panic!("spatial literal did not parse");
        };
        assert_eq!(srid, Some(4326));
        assert_eq!(shape, SpatialShape::Point);
        assert_eq!(to_spatial("not wkt", false), None);
    }
}

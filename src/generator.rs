//! Typed random parameter values.
//!
//! A [`ValueGenerator`] is parsed from a `{type,format,X,Y,parseFormat}`
//! specifier and produces one freshly drawn value per call. Generator
//! instances are built per worker so nothing here is shared; the caller owns
//! the random source and passes it in, which also lets tests pin seeds.

use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use regex::Regex;

use crate::data::DataTable;
use crate::error::{DriverError, Result};

/// The characters random strings are drawn from.
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

static ARG_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" *, *").unwrap());

const DATE_FORMAT: &str = "%Y/%m/%d";
const DATE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// A generated parameter value. Workers dispatch on the variant when binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Str(String),
    Bool(bool),
    Date(NaiveDateTime),
}

impl Value {
    /// Plain text rendering, used by `%` formatting and by the date binder.
    pub fn render(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Bool(v) => v.to_string(),
            Value::Date(v) => v.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// How one parameter draws its raw value.
#[derive(Debug, Clone)]
enum Sampler {
    Int { first: i64, delta: i64 },
    Long { first: i64, delta: i64 },
    Str { first: i64, delta: i64 },
    Bool { percent_true: i64 },
    /// Bounds in milliseconds since the epoch.
    Date { first: i64, delta: i64 },
    TableRef {
        table: Arc<DataTable>,
        first: i64,
        delta: i64,
        column: usize,
    },
}

/// One parameter's value factory.
#[derive(Debug, Clone)]
pub struct ValueGenerator {
    sampler: Sampler,
    format: Option<String>,
}

impl ValueGenerator {
    /// Parse a specifier, with or without the surrounding braces.
    ///
    /// Tokens are `type[,format][,X][,Y][,parseFormat]`; `format` is present
    /// iff the second token does not begin with an ASCII digit.
    pub fn parse(spec: &str, table: &Arc<DataTable>) -> Result<Self> {
        let body = spec.trim();
        let body = match body.strip_prefix('{') {
            Some(inner) => inner.strip_suffix('}').unwrap_or(inner),
            None => body,
        };
        let args: Vec<&str> = ARG_SPLIT.split(body).collect();

        let kind = args[0];
        if kind.is_empty() {
            return Err(DriverError::bad_spec(spec, "empty specifier"));
        }

        let mut next = 1;
        let format = args
            .get(next)
            .filter(|a| !a.is_empty() && !a.starts_with(|c: char| c.is_ascii_digit()))
            .map(|a| a.to_string());
        if format.is_some() {
            next += 1;
        }
        let first = args.get(next).copied().filter(|a| !a.is_empty());
        let second = args.get(next + 1).copied().filter(|a| !a.is_empty());
        let parse_format = args.get(next + 2).copied();

        let sampler = match kind.to_lowercase().as_str() {
            "int" => {
                let first = parse_bound::<i32>(first, 0, spec)? as i64;
                let second = parse_bound::<i32>(second, i32::MAX, spec)? as i64;
                Sampler::Int {
                    first,
                    delta: second - first,
                }
            }
            "long" => {
                let first = parse_bound::<i64>(first, 0, spec)?;
                let second = parse_bound::<i64>(second, i64::MAX, spec)?;
                Sampler::Long {
                    first,
                    delta: second.saturating_sub(first),
                }
            }
            "string" => {
                let first = parse_bound::<i64>(first, 5, spec)?;
                let second = parse_bound::<i64>(second, first, spec)?;
                Sampler::Str {
                    first,
                    delta: second - first,
                }
            }
            "boolean" => Sampler::Bool {
                percent_true: parse_bound::<i64>(first, 50, spec)?,
            },
            "date" => {
                let first = match first {
                    Some(text) => parse_date(text, parse_format)?,
                    None => Utc::now().timestamp_millis(),
                };
                let second = match second {
                    Some(text) => parse_date(text, parse_format)?,
                    None => first,
                };
                Sampler::Date {
                    first,
                    delta: second - first,
                }
            }
            "value" => {
                if table.is_empty() {
                    return Err(DriverError::EmptyDataTable { spec: spec.to_string() });
                }
                let first = parse_bound::<i64>(first, 0, spec)?;
                let column = parse_bound::<i64>(second, 0, spec)?;
                if first < 0 || first >= table.len() as i64 {
                    return Err(DriverError::bad_spec(
                        spec,
                        format!("first row {first} outside the {}-row data table", table.len()),
                    ));
                }
                if column < 0 || !table.column_in_range(first as usize, column as usize) {
                    return Err(DriverError::bad_spec(
                        spec,
                        format!("column {column} missing from one or more data rows"),
                    ));
                }
                Sampler::TableRef {
                    table: Arc::clone(table),
                    first,
                    delta: table.len() as i64 - first,
                    column: column as usize,
                }
            }
            _ => return Err(DriverError::UnknownParamType { spec: spec.to_string() }),
        };

        Ok(Self { sampler, format })
    }

    /// Draw the next value.
    pub fn next_value(&self, rng: &mut StdRng) -> Value {
        let r: f64 = rng.random();
        let raw = match &self.sampler {
            Sampler::Int { first, delta } => Value::Int((first + scaled(r, *delta)) as i32),
            Sampler::Long { first, delta } => Value::Long(first + scaled(r, *delta)),
            Sampler::Str { first, delta } => {
                let length = (first + scaled(r, *delta)).max(0) as usize;
                Value::Str(random_string(length, rng))
            }
            Sampler::Bool { percent_true } => Value::Bool(r * 100.0 < *percent_true as f64),
            Sampler::Date { first, delta } => {
                let millis = first + scaled(r, *delta);
                let date = DateTime::from_timestamp_millis(millis)
                    .map(|dt| dt.naive_utc())
                    .unwrap_or(NaiveDateTime::UNIX_EPOCH);
                Value::Date(date)
            }
            Sampler::TableRef {
                table,
                first,
                delta,
                column,
            } => {
                let row = (first + scaled(r, *delta)) as usize;
                Value::Str(table.get(row, *column).unwrap_or_default().to_string())
            }
        };

        match &self.format {
            Some(format) => Value::Str(apply_format(format, &raw)),
            None => raw,
        }
    }
}

/// `floor(r * delta)` in integer space; `r` is in `[0, 1)` so the result
/// stays strictly below `delta` for positive deltas.
fn scaled(r: f64, delta: i64) -> i64 {
    (r * delta as f64) as i64
}

fn parse_bound<T: FromStr>(value: Option<&str>, default: T, spec: &str) -> Result<T> {
    match value {
        Some(text) => text
            .parse()
            .map_err(|_| DriverError::bad_spec(spec, format!("invalid bound '{text}'"))),
        None => Ok(default),
    }
}

/// Parse a date bound to epoch milliseconds. Without an explicit parse
/// format, `yyyy/mm/dd` is assumed, or `yyyy/mm/dd hh:mm:ss` when the text
/// contains a space.
fn parse_date(text: &str, parse_format: Option<&str>) -> Result<i64> {
    let format = match parse_format {
        Some(f) => f,
        None if text.contains(' ') => DATE_TIME_FORMAT,
        None => DATE_FORMAT,
    };
    let parsed = NaiveDateTime::parse_from_str(text, format).or_else(|_| {
        NaiveDate::parse_from_str(text, format).map(|d| d.and_time(NaiveTime::MIN))
    });
    match parsed {
        Ok(date) => Ok(date.and_utc().timestamp_millis()),
        Err(_) => Err(DriverError::BadDate { text: text.to_string() }),
    }
}

fn random_string(length: usize, rng: &mut StdRng) -> String {
    (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Minimal printf-style templating: each `%...<letter>` directive is replaced
/// by the rendered value and `%%` is a literal percent. Date values instead
/// treat the whole template as a chrono format string, so date formats like
/// `%Y-%m` come out as dates rather than repeated substitutions.
fn apply_format(template: &str, value: &Value) -> String {
    if let Value::Date(date) = value {
        return date.format(template).to_string();
    }
    let rendered = value.render();
    let mut out = String::with_capacity(template.len() + rendered.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(_) => {
                while let Some(&next) = chars.peek() {
                    chars.next();
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
                out.push_str(&rendered);
            }
            None => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn table() -> Arc<DataTable> {
        Arc::new(DataTable::default())
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0x5eed)
    }

    fn parse(spec: &str) -> ValueGenerator {
        ValueGenerator::parse(spec, &table()).unwrap()
    }

    #[test]
    fn int_values_stay_inside_the_half_open_range() {
        let generator = parse("{int,1,10}");
        let mut rng = rng();
        for _ in 0..1000 {
            match generator.next_value(&mut rng) {
                Value::Int(v) => assert!((1..10).contains(&v), "got {v}"),
                other => panic!("expected an int, got {other:?}"),
            }
        }
    }

    #[test]
    fn long_values_use_64_bit_bounds() {
        let generator = parse("{long,5000000000,5000000010}");
        let mut rng = rng();
        for _ in 0..100 {
            match generator.next_value(&mut rng) {
                Value::Long(v) => assert!((5_000_000_000..5_000_000_010).contains(&v)),
                other => panic!("expected a long, got {other:?}"),
            }
        }
    }

    #[test]
    fn boolean_percentage_is_respected() {
        let generator = parse("{boolean,30}");
        let mut rng = rng();
        let trues = (0..10_000)
            .filter(|_| generator.next_value(&mut rng) == Value::Bool(true))
            .count();
        assert!((2700..=3300).contains(&trues), "got {trues} trues");
    }

    #[test]
    fn boolean_defaults_to_an_even_split() {
        let generator = parse("{boolean}");
        let mut rng = rng();
        let trues = (0..10_000)
            .filter(|_| generator.next_value(&mut rng) == Value::Bool(true))
            .count();
        assert!((4600..=5400).contains(&trues), "got {trues} trues");
    }

    #[test]
    fn strings_use_the_alphabet_and_the_length_range() {
        let generator = parse("{string,5,10}");
        let mut rng = rng();
        for _ in 0..1000 {
            match generator.next_value(&mut rng) {
                Value::Str(s) => {
                    assert!((5..=10).contains(&s.len()), "length {}", s.len());
                    assert!(s.chars().all(|c| c.is_ascii_alphanumeric()), "got {s:?}");
                }
                other => panic!("expected a string, got {other:?}"),
            }
        }
    }

    #[test]
    fn string_length_defaults_to_five() {
        let generator = parse("{string}");
        let mut rng = rng();
        for _ in 0..20 {
            match generator.next_value(&mut rng) {
                Value::Str(s) => assert_eq!(s.len(), 5),
                other => panic!("expected a string, got {other:?}"),
            }
        }
    }

    #[test]
    fn format_turns_numbers_into_strings() {
        let generator = parse("{int,user-%d,100,999}");
        let mut rng = rng();
        match generator.next_value(&mut rng) {
            Value::Str(s) => {
                let suffix = s.strip_prefix("user-").expect("prefix");
                let n: i32 = suffix.parse().expect("numeric suffix");
                assert!((100..999).contains(&n));
            }
            other => panic!("expected a formatted string, got {other:?}"),
        }
    }

    #[test]
    fn percent_escape_survives_formatting() {
        assert_eq!(apply_format("100%% of %d", &Value::Int(7)), "100% of 7");
        assert_eq!(apply_format("tail %", &Value::Int(7)), "tail %");
    }

    #[test]
    fn date_bounds_parse_with_the_default_formats() {
        let generator = parse("{date,1910/1/1,2011/12/31}");
        let mut rng = rng();
        let low = NaiveDate::from_ymd_opt(1910, 1, 1).unwrap();
        let high = NaiveDate::from_ymd_opt(2011, 12, 31).unwrap();
        for _ in 0..100 {
            match generator.next_value(&mut rng) {
                Value::Date(d) => assert!(d.date() >= low && d.date() <= high),
                other => panic!("expected a date, got {other:?}"),
            }
        }
    }

    #[test]
    fn datetime_bounds_use_the_long_format() {
        let generator = parse("{date,2020/6/1 08:00:00,2020/6/1 09:00:00}");
        let mut rng = rng();
        match generator.next_value(&mut rng) {
            Value::Date(d) => assert_eq!(d.date(), NaiveDate::from_ymd_opt(2020, 6, 1).unwrap()),
            other => panic!("expected a date, got {other:?}"),
        }
    }

    #[test]
    fn date_format_renders_through_chrono() {
        let generator = parse("{date,%Y,1999/6/1,1999/6/2}");
        let mut rng = rng();
        assert_eq!(generator.next_value(&mut rng), Value::Str("1999".into()));
    }

    #[test]
    fn value_generator_picks_rows_and_columns() {
        let table = Arc::new(DataTable::from_rows(vec![
            vec!["header".into(), "columns".into()],
            vec!["a1".into(), "b1".into()],
            vec!["a2".into(), "b2".into()],
        ]));
        let generator = ValueGenerator::parse("{value,1,1}", &table).unwrap();
        let mut rng = rng();
        for _ in 0..100 {
            match generator.next_value(&mut rng) {
                Value::Str(s) => assert!(s == "b1" || s == "b2", "got {s:?}"),
                other => panic!("expected a table value, got {other:?}"),
            }
        }
    }

    #[test]
    fn value_type_needs_a_loaded_table() {
        let err = ValueGenerator::parse("{value,1,0}", &table()).unwrap_err();
        assert!(matches!(err, DriverError::EmptyDataTable { .. }));
    }

    #[test]
    fn value_bounds_are_checked_at_construction() {
        let table = Arc::new(DataTable::from_rows(vec![vec!["only".into()]]));
        assert!(ValueGenerator::parse("{value,5,0}", &table).is_err());
        assert!(ValueGenerator::parse("{value,0,3}", &table).is_err());
    }

    #[test]
    fn unknown_type_is_fatal() {
        let err = ValueGenerator::parse("{uuid,1,2}", &table()).unwrap_err();
        assert!(matches!(err, DriverError::UnknownParamType { .. }));
    }

    #[test]
    fn braces_are_optional() {
        let generator = ValueGenerator::parse("int,1,3", &table()).unwrap();
        let mut rng = rng();
        match generator.next_value(&mut rng) {
            Value::Int(v) => assert!((1..3).contains(&v)),
            other => panic!("expected an int, got {other:?}"),
        }
    }

    #[test]
    fn second_token_starting_with_a_digit_is_a_bound_not_a_format() {
        let generator = parse("{string,5,5}");
        let mut rng = rng();
        match generator.next_value(&mut rng) {
            Value::Str(s) => assert_eq!(s.len(), 5),
            other => panic!("expected a string, got {other:?}"),
        }
    }
}

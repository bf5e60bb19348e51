use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Text(_) => "TEXT",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as a UTC timestamp.
    ///
    /// Text values are accepted in RFC 3339 and in the server text formats
    /// (`2026-10-18 09:30:00.123456+00`, `2026-10-18 09:30:00.123456`).
    /// Offset-less text is taken as UTC.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{}", s),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Option<DateTime<Utc>>> for Value {
    fn from(ts: Option<DateTime<Utc>>) -> Self {
        ts.map_or(Self::Null, Self::Timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_from_postgres_text() {
        let expected = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();

        let value = Value::Text("2026-10-18 09:30:00+00".into());
        assert_eq!(value.as_timestamp(), Some(expected));

        let value = Value::Text("2026-10-18 11:30:00.000000+02".into());
        assert_eq!(value.as_timestamp(), Some(expected));
    }

    #[test]
    fn test_timestamp_from_mysql_and_rfc3339_text() {
        let expected = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();

        assert_eq!(
            Value::Text("2026-10-18 09:30:00.000000".into()).as_timestamp(),
            Some(expected)
        );
        assert_eq!(
            Value::Text("2026-10-18T09:30:00Z".into()).as_timestamp(),
            Some(expected)
        );
    }

    #[test]
    fn test_non_timestamps() {
        assert_eq!(Value::Null.as_timestamp(), None);
        assert_eq!(Value::Integer(7).as_timestamp(), None);
        assert_eq!(Value::Text("yesterday".into()).as_timestamp(), None);
        assert!(Value::from(None::<DateTime<Utc>>).is_null());
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(Value::Integer(3).as_i64(), Some(3));
        assert_eq!(Value::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(Value::Null.as_i64(), None);
    }
}

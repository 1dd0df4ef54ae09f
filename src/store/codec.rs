//! Column encodings for model types.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::model::{
    AlertKind, AlertState, AssignmentStatus, CheckInKind, CheckInState, Presence, RoundStatus,
    SampleSource, Severity,
};

/// Stores a code-carrying enum as its `as_str()` text.
macro_rules! text_column {
    ($($ty:ty),+ $(,)?) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let code = value.as_str()?;
                <$ty>::parse(code).ok_or_else(|| {
                    FromSqlError::Other(
                        format!("unknown {} code: {code}", stringify!($ty)).into(),
                    )
                })
            }
        }
    )+};
}

text_column!(
    AssignmentStatus,
    RoundStatus,
    Presence,
    CheckInKind,
    CheckInState,
    AlertKind,
    AlertState,
    Severity,
    SampleSource,
);

/// Reads an epoch-millisecond column as a UTC timestamp.
pub(super) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(super) fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

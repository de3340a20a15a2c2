//! `regexp` predicate backing `X REGEXP Y` and `FindMode::Regexp`
//!
//! The backend rewrites `X REGEXP Y` to `regexp(Y, X)`, so argument 0 is the
//! pattern and argument 1 the subject. A compiled pattern is cached on the
//! statement and reused for every row. A pattern that does not compile
//! matches nothing.

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, Error};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Register the two-argument `regexp` function on `conn`.
pub fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8
            | FunctionFlags::SQLITE_DETERMINISTIC
            | FunctionFlags::SQLITE_DIRECTONLY,
        |ctx| {
            let pattern = ctx.get_or_create_aux(0, |vr| -> Result<Option<Regex>, BoxError> {
                Ok(Regex::new(vr.as_str()?).ok())
            })?;
            let subject = ctx
                .get_raw(1)
                .as_str()
                .map_err(|e| Error::UserFunctionError(e.into()))?;
            Ok(match &*pattern {
                Some(re) => re.is_match(subject),
                None => false,
            })
        },
    )
}

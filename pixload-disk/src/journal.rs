//! Journal records.
//!
//! The journal is a line-oriented, append-only log. It starts with a header:
//!
//! ```text
//! pixload.DiskCache
//! 1
//! 2
//! 2
//!
//! ```
//!
//! (magic, journal format version, application schema version, value
//! count, blank line) followed by one record per line:
//!
//! - `DIRTY <key>` - an edit started; must be followed by `CLEAN` or `REMOVE`
//! - `CLEAN <key> <len0> <len1>` - an edit was committed with these value lengths
//! - `REMOVE <key>` - the entry was deleted or its first edit was aborted
//! - `READ <key>` - the entry was read, only used to restore LRU order

use std::fmt;
use std::io::{self, Write};

use crate::VALUE_COUNT;

pub(crate) const MAGIC: &str = "pixload.DiskCache";
pub(crate) const JOURNAL_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Record {
    Dirty(String),
    Clean(String, [u64; VALUE_COUNT]),
    Remove(String),
    Read(String),
}

impl Record {
    fn parse(line: &str) -> Option<Record> {
        let mut parts = line.split(' ');
        let kind = parts.next()?;
        let key = parts.next().filter(|k| !k.is_empty())?.to_owned();

        let record = match kind {
            "DIRTY" => Record::Dirty(key),
            "REMOVE" => Record::Remove(key),
            "READ" => Record::Read(key),
            "CLEAN" => {
                let mut lengths = [0u64; VALUE_COUNT];
                for length in lengths.iter_mut() {
                    *length = parts.next()?.parse().ok()?;
                }
                Record::Clean(key, lengths)
            }
            _ => return None,
        };

        parts.next().is_none().then_some(record)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Dirty(key) => write!(f, "DIRTY {key}"),
            Record::Remove(key) => write!(f, "REMOVE {key}"),
            Record::Read(key) => write!(f, "READ {key}"),
            Record::Clean(key, lengths) => {
                write!(f, "CLEAN {key}")?;
                for length in lengths {
                    write!(f, " {length}")?;
                }
                Ok(())
            }
        }
    }
}

pub(crate) fn write_header<W: Write>(w: &mut W, app_version: u32) -> io::Result<()> {
    writeln!(w, "{MAGIC}")?;
    writeln!(w, "{JOURNAL_VERSION}")?;
    writeln!(w, "{app_version}")?;
    writeln!(w, "{VALUE_COUNT}")?;
    writeln!(w)
}

/// Result of parsing an existing journal.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Parsed {
    /// Records in file order. `torn` is set when a trailing partial line
    /// was dropped and the journal should be rewritten.
    Valid { records: Vec<Record>, torn: bool },
    /// Header does not match or a record is unreadable.
    Invalid(String),
}

pub(crate) fn parse(contents: &str, app_version: u32) -> Parsed {
    let (complete, torn) = match contents.rfind('\n') {
        Some(end) => (&contents[..=end], end + 1 != contents.len()),
        None => ("", !contents.is_empty()),
    };
    let mut lines = complete.lines();

    let app_version = app_version.to_string();
    let value_count = VALUE_COUNT.to_string();
    let expected = [
        MAGIC,
        JOURNAL_VERSION,
        app_version.as_str(),
        value_count.as_str(),
        "",
    ];
    for want in expected {
        match lines.next() {
            Some(got) if got == want => {}
            got => {
                return Parsed::Invalid(format!(
                    "unexpected journal header: {got:?}, expected {want:?}"
                ));
            }
        }
    }

    let mut records = Vec::new();
    for line in lines {
        match Record::parse(line) {
            Some(record) => records.push(record),
            None => return Parsed::Invalid(format!("unexpected journal line: {line:?}")),
        }
    }
    Parsed::Valid { records, torn }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn journal(app_version: u32, body: &str) -> String {
        let mut out = Vec::new();
        write_header(&mut out, app_version).unwrap();
        format!("{}{}", String::from_utf8(out).unwrap(), body)
    }

    #[test]
    fn test_records_round_trip_through_text() {
        let records = vec![
            Record::Dirty("k1".into()),
            Record::Clean("k1".into(), [10, 20]),
            Record::Read("k1".into()),
            Record::Remove("k1".into()),
        ];
        let body: String = records.iter().map(|r| format!("{r}\n")).collect();

        assert_eq!(
            parse(&journal(2, &body), 2),
            Parsed::Valid {
                records,
                torn: false
            }
        );
    }

    #[test]
    fn test_header_mismatch() {
        let contents = journal(1, "CLEAN k 1 2\n");
        assert!(matches!(parse(&contents, 2), Parsed::Invalid(_)));
        assert!(matches!(parse("", 2), Parsed::Invalid(_)));
    }

    #[test]
    fn test_bad_record() {
        for body in ["CLEAN k 1\n", "CLEAN k 1 2 3\n", "BOGUS k\n", "DIRTY\n", "CLEAN k x 2\n"] {
            assert!(
                matches!(parse(&journal(2, body), 2), Parsed::Invalid(_)),
                "{body:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let contents = journal(2, "CLEAN k 1 2\nCLEAN j 3");
        assert_eq!(
            parse(&contents, 2),
            Parsed::Valid {
                records: vec![Record::Clean("k".into(), [1, 2])],
                torn: true
            }
        );
    }
}

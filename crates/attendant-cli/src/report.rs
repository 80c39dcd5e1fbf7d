//! Monthly CSV export: one row per attendance mark.

use attendant_store::AttendanceEntry;
use std::borrow::Cow;
use std::io::{self, Write};
use std::path::Path;

const HEADER: &str = "date,time,identity_id,name,employee_id,marked_at";

/// Quote a field when it contains a separator, quote or line break.
fn field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn write_csv<W: Write>(out: &mut W, entries: &[AttendanceEntry]) -> io::Result<()> {
    writeln!(out, "{HEADER}")?;
    for e in entries {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            e.marked_at.format("%Y-%m-%d"),
            e.marked_at.format("%H:%M:%S"),
            field(e.identity.as_str()),
            field(&e.name),
            field(e.employee_id.as_deref().unwrap_or("")),
            e.marked_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        )?;
    }
    Ok(())
}

/// Write the report next to its destination, then rename into place.
pub fn export(path: &Path, entries: &[AttendanceEntry]) -> io::Result<()> {
    let tmp = path.with_extension("csv.tmp");
    {
        let mut file = io::BufWriter::new(std::fs::File::create(&tmp)?);
        write_csv(&mut file, entries)?;
        file.flush()?;
    }
    std::fs::rename(&tmp, path)
}

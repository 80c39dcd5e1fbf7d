//! Plain-text tables for terminal output.

use attendant_store::{AttendanceEntry, DailyAttendance, IdentitySummary, MonthlySummary, RecognitionLog};
use std::fmt::Write;

/// Left-aligned columns sized to the widest cell.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    write_row(&mut out, headers.iter().copied(), &widths);
    for row in rows {
        write_row(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn write_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let parts: Vec<String> = cells
        .zip(widths)
        .map(|(c, w)| format!("{c:<w$}", w = *w))
        .collect();
    let _ = writeln!(out, "{}", parts.join("  ").trim_end());
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

pub fn identities_table(identities: &[IdentitySummary]) -> String {
    let rows: Vec<Vec<String>> = identities
        .iter()
        .map(|i| {
            vec![
                i.id.to_string(),
                i.name.clone(),
                or_dash(i.employee_id.as_deref()),
                i.references.to_string(),
                if i.active { "active" } else { "inactive" }.to_string(),
                i.created_at.format("%Y-%m-%d").to_string(),
            ]
        })
        .collect();
    table(&["ID", "NAME", "EMPLOYEE", "REFS", "STATUS", "ENROLLED"], &rows)
}

pub fn attendance_table(rows: &[DailyAttendance]) -> String {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.name.clone(),
                or_dash(r.employee_id.as_deref()),
                r.first_mark.format("%H:%M:%S").to_string(),
                r.last_mark.format("%H:%M:%S").to_string(),
                r.marks.to_string(),
            ]
        })
        .collect();
    table(&["NAME", "EMPLOYEE", "FIRST", "LAST", "MARKS"], &rows)
}

pub fn summary_table(rows: &[MonthlySummary]) -> String {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.name.clone(),
                or_dash(r.employee_id.as_deref()),
                r.days_present.to_string(),
                r.marks.to_string(),
            ]
        })
        .collect();
    table(&["NAME", "EMPLOYEE", "DAYS", "MARKS"], &rows)
}

pub fn history_table(entries: &[AttendanceEntry]) -> String {
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.marked_at.format("%Y-%m-%d").to_string(),
                e.marked_at.format("%H:%M:%S").to_string(),
            ]
        })
        .collect();
    table(&["DATE", "TIME"], &rows)
}

pub fn logs_table(logs: &[RecognitionLog]) -> String {
    let rows: Vec<Vec<String>> = logs
        .iter()
        .map(|l| {
            vec![
                l.logged_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                or_dash(l.identity.as_ref().map(|i| i.as_str())),
                format!("{:.3}", l.confidence),
                l.status.clone(),
            ]
        })
        .collect();
    table(&["TIME", "IDENTITY", "CONFIDENCE", "STATUS"], &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendant_core::IdentityId;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_table_alignment() {
        let out = table(
            &["A", "LONG"],
            &[vec!["wide cell".into(), "x".into()], vec!["b".into(), "y".into()]],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], format!("A{}LONG", " ".repeat(10)));
        assert_eq!(lines[1], "wide cell  x");
        assert_eq!(lines[2], format!("b{}y", " ".repeat(10)));
    }

    #[test]
    fn test_attendance_table() {
        let out = attendance_table(&[DailyAttendance {
            identity: IdentityId::from("a1"),
            name: "Alice".into(),
            employee_id: None,
            first_mark: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 5).unwrap(),
            last_mark: Utc.with_ymd_and_hms(2026, 3, 2, 17, 30, 0).unwrap(),
            marks: 4,
        }]);
        let row = out.lines().nth(1).unwrap();
        assert!(row.starts_with("Alice"));
        assert!(row.contains("08:00:05"));
        assert!(row.contains("17:30:00"));
        assert!(row.contains(" - "));
        assert!(row.ends_with('4'));
    }

    #[test]
    fn test_history_table() {
        let out = history_table(&[AttendanceEntry {
            identity: IdentityId::from("a1"),
            name: "Alice".into(),
            employee_id: None,
            marked_at: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 5).unwrap(),
        }]);
        assert_eq!(out, "DATE        TIME\n2026-03-02  08:00:05\n");
    }

    #[test]
    fn test_logs_table_unknown_identity() {
        let out = logs_table(&[RecognitionLog {
            identity: None,
            confidence: 0.41234,
            status: "unknown".into(),
            logged_at: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
        }]);
        let row = out.lines().nth(1).unwrap();
        assert!(row.contains("0.412"));
        assert!(row.ends_with("unknown"));
    }
}

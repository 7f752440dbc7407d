use crate::error::Result;
use crate::gedcom::Gedcom;
use crate::property::PropertyRef;
use chrono::{DateTime, Utc};
use std::io::Write;

pub const GEDCOM_VERSION: &str = "5.5.1";

/// Write the whole document: header, records in grammar order followed by
/// undeclared record tags, trailer.
pub fn write_to<W: Write>(gedcom: &Gedcom, out: &mut W, now: DateTime<Utc>) -> Result<()> {
    write_header(out, now)?;
    for tag in gedcom.entity_tags() {
        for entity in gedcom.entities(tag) {
            let root = entity.root();
            write_value(out, 0, &format!("@{}@ {}", entity.id(), entity.tag()), root.value())?;
            for child in root.children() {
                write_property(out, 1, child)?;
            }
        }
    }
    writeln!(out, "0 TRLR")?;
    Ok(())
}

fn write_header<W: Write>(out: &mut W, now: DateTime<Utc>) -> Result<()> {
    writeln!(out, "0 HEAD")?;
    writeln!(out, "1 SOUR GEDGRAPH")?;
    writeln!(out, "2 VERS {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "1 DATE {}", now.format("%d %b %Y").to_string().to_uppercase())?;
    writeln!(out, "2 TIME {}", now.format("%H:%M:%S"))?;
    writeln!(out, "1 GEDC")?;
    writeln!(out, "2 VERS {GEDCOM_VERSION}")?;
    writeln!(out, "2 FORM LINEAGE-LINKED")?;
    writeln!(out, "1 CHAR UTF-8")?;
    Ok(())
}

fn write_property<W: Write>(out: &mut W, level: usize, property: PropertyRef<'_>) -> Result<()> {
    if property.is_cross_reference() {
        writeln!(out, "{level} {} @{}@", property.tag(), property.value())?;
    } else {
        write_value(out, level, property.tag(), property.value())?;
    }
    for child in property.children() {
        write_property(out, level + 1, child)?;
    }
    Ok(())
}

/// Longest value chunk per line; the rest continues on CONC lines.
const MAX_CHUNK: usize = 200;

/// `head` followed by the value. Every `@` is doubled, embedded newlines
/// become CONT lines and long lines are split with CONC.
fn write_value<W: Write>(out: &mut W, level: usize, head: &str, value: &str) -> Result<()> {
    let escaped = value.replace('@', "@@");
    let mut lines = escaped.split('\n');
    let first = lines.next().unwrap_or_default();
    write_line(out, &format!("{level} {head}"), level + 1, first)?;
    for line in lines {
        write_line(out, &format!("{} CONT", level + 1), level + 1, line)?;
    }
    Ok(())
}

fn write_line<W: Write>(out: &mut W, head: &str, conc_level: usize, line: &str) -> Result<()> {
    let mut chunks = chunks(line);
    match chunks.next() {
        Some(chunk) => writeln!(out, "{head} {chunk}")?,
        None => writeln!(out, "{head}")?,
    }
    for chunk in chunks {
        writeln!(out, "{conc_level} CONC {chunk}")?;
    }
    Ok(())
}

/// Split on char boundaries, never between the two halves of an `@@`.
fn chunks(line: &str) -> impl Iterator<Item = &str> {
    let mut rest = line;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let mut end = rest.char_indices().nth(MAX_CHUNK).map_or(rest.len(), |(i, _)| i);
        if end < rest.len() {
            let trailing = rest[..end].bytes().rev().take_while(|b| *b == b'@').count();
            if trailing % 2 == 1 && trailing < end {
                end -= 1;
            }
        }
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_multiline_values_become_cont_lines() {
        let mut out = Vec::new();
        write_value(&mut out, 1, "NOTE", "one\n\nthree").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1 NOTE one\n2 CONT\n2 CONT three\n");
    }

    #[test]
    fn test_at_signs_are_doubled() {
        let mut out = Vec::new();
        write_value(&mut out, 1, "NOTE", "@N5@ or mail@example.org").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1 NOTE @@N5@@ or mail@@example.org\n");
    }

    #[test]
    fn test_long_lines_continue_with_conc() {
        let text = "x".repeat(MAX_CHUNK * 2 + 5);
        let mut out = Vec::new();
        write_value(&mut out, 0, "@N1@ NOTE", &format!("short\n{text}")).unwrap();
        let written = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "0 @N1@ NOTE short");
        assert_eq!(lines[1], format!("1 CONT {}", "x".repeat(MAX_CHUNK)));
        assert_eq!(lines[2], format!("1 CONC {}", "x".repeat(MAX_CHUNK)));
        assert_eq!(lines[3], "1 CONC xxxxx");
    }

    #[test]
    fn test_chunks_keep_escaped_pairs_together() {
        let line = format!("{}@@tail", "a".repeat(MAX_CHUNK - 1));
        let parts: Vec<&str> = chunks(&line).collect();
        assert_eq!(parts[0], "a".repeat(MAX_CHUNK - 1));
        assert_eq!(parts[1], "@@tail");
    }

    #[test]
    fn test_header_and_trailer() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        let mut out = Vec::new();
        write_to(&Gedcom::new(), &mut out, now).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("0 HEAD\n1 SOUR GEDGRAPH\n"));
        assert!(text.contains("1 DATE 05 MAR 2024\n2 TIME 14:30:00\n"));
        assert!(text.contains("1 CHAR UTF-8\n"));
        assert!(text.ends_with("0 TRLR\n"));
    }
}

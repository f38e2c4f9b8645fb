/// Delimited-text table parser.
///
/// The parser is total: any input yields a (possibly empty) record list.

use crate::schema::record::{parse_finite, Field, Record};

/// Column name used when the input has no header row.
pub const DEFAULT_CHANNEL: &str = "value";

/// Parse comma-delimited text into records, one per data line.
///
/// The first non-blank line is a header when at least one of its fields is
/// non-empty and non-numeric. Without a header every line, the first
/// included, is a single `value` column. Short rows leave the missing
/// columns `Empty`; extra fields are ignored.
pub fn parse_table(input: &str) -> Vec<Record> {
    let lines: Vec<&str> = input
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).trim())
        .filter(|line| !line.is_empty())
        .collect();

    let Some(first) = lines.first() else {
        return Vec::new();
    };

    if !is_header(first) {
        return lines
            .iter()
            .map(|line| Record::new(vec![(DEFAULT_CHANNEL.to_string(), Field::parse(line))]))
            .collect();
    }

    let header: Vec<String> = first.split(',').map(|h| h.trim().to_string()).collect();

    lines[1..]
        .iter()
        .map(|line| {
            let mut cells = line.split(',');
            let fields = header
                .iter()
                .map(|name| {
                    let field = cells.next().map(Field::parse).unwrap_or(Field::Empty);
                    (name.clone(), field)
                })
                .collect();
            Record::new(fields)
        })
        .collect()
}

fn is_header(line: &str) -> bool {
    line.split(',').any(|cell| {
        let cell = cell.trim();
        !cell.is_empty() && parse_finite(cell).is_none()
    })
}

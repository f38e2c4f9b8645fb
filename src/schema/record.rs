use serde::{Deserialize, Serialize};

/// A single cell of an input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    /// A value that parsed as a finite number.
    Number(f64),
    /// Anything else, trimmed.
    Text(String),
    /// A field the row did not supply.
    Empty,
}

impl Field {
    /// Parse a raw cell. Finite numbers become `Number`, empty cells become
    /// `Empty`, everything else is kept as trimmed text.
    pub fn parse(raw: &str) -> Field {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Field::Empty;
        }
        match parse_finite(trimmed) {
            Some(n) => Field::Number(n),
            None => Field::Text(trimmed.to_string()),
        }
    }

    /// Numeric view of the field. Text and empty cells coerce to 0.
    pub fn as_number(&self) -> f64 {
        match self {
            Field::Number(n) => *n,
            Field::Text(_) | Field::Empty => 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Field::Empty)
    }
}

/// Parses `s` as a finite `f64`. Rejects `inf`, `NaN` and friends.
pub fn parse_finite(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// One input row: channel name to field, in column order.
///
/// Records are immutable once parsed; their position in the parsed
/// sequence is the time axis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Field)>,
}

impl Record {
    pub fn new(fields: Vec<(String, Field)>) -> Self {
        Self { fields }
    }

    /// Returns the field for `channel`, if the row has that column.
    pub fn get(&self, channel: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|(name, _)| name == channel)
            .map(|(_, field)| field)
    }

    /// Numeric value of `channel`; missing or non-numeric fields are 0.
    pub fn number(&self, channel: &str) -> f64 {
        self.get(channel).map(Field::as_number).unwrap_or(0.0)
    }

    /// True when the row carries a non-empty value for `channel`.
    pub fn has(&self, channel: &str) -> bool {
        self.get(channel).is_some_and(|f| !f.is_empty())
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_parse_variants() {
        assert_eq!(Field::parse(" 1.5 "), Field::Number(1.5));
        assert_eq!(Field::parse("-2e-3"), Field::Number(-0.002));
        assert_eq!(Field::parse("calm"), Field::Text("calm".to_string()));
        assert_eq!(Field::parse("   "), Field::Empty);
    }

    #[test]
    fn non_finite_is_text() {
        assert_eq!(Field::parse("inf"), Field::Text("inf".to_string()));
        assert_eq!(Field::parse("NaN"), Field::Text("NaN".to_string()));
    }

    #[test]
    fn record_lookup_and_coercion() {
        let record = Record::new(vec![
            ("seismic".to_string(), Field::Number(0.02)),
            ("site".to_string(), Field::Text("ridge".to_string())),
            ("temp".to_string(), Field::Empty),
        ]);
        assert_eq!(record.number("seismic"), 0.02);
        assert_eq!(record.number("site"), 0.0);
        assert_eq!(record.number("missing"), 0.0);
        assert!(record.has("site"));
        assert!(!record.has("temp"));
        assert_eq!(record.channels().collect::<Vec<_>>(), vec!["seismic", "site", "temp"]);
    }
}

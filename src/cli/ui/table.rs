use std::fmt::{self, Display, Formatter};

use tabled::{builder::Builder, settings::Style as TableStyle};

use super::painter::Painter;

/// A rounded table that renders via `Display`.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub(crate) fn grid(
        headers: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Two-column field/value table with muted field names.
    pub(crate) fn key_value(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        let records = rows
            .into_iter()
            .map(|(field, value)| vec![painter.muted(field), value])
            .collect();
        Self::grid(["field", "value"], records)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(&self.headers);
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        table.with(TableStyle::rounded());
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_renders_headers_before_rows() {
        let table = Table::grid(
            ["id", "state"],
            vec![
                vec!["AA:BB".into(), "connected".into()],
                vec!["CC:DD".into(), "discovered".into()],
            ],
        )
        .to_string();

        let header = table.find("state").expect("header should render");
        let first = table.find("AA:BB").expect("first row should render");
        let second = table.find("CC:DD").expect("second row should render");
        assert!(header < first && first < second);
        assert!(table.starts_with('╭'));
    }

    #[test]
    fn key_value_uses_field_value_headers() {
        let painter = Painter::new(false);
        let table = Table::key_value(&painter, vec![("rssi", "-43".into())]);

        assert!(!table.is_empty());
        let rendered = table.to_string();
        assert!(rendered.contains("field"));
        assert!(rendered.contains("rssi"));
        assert!(rendered.contains("-43"));
    }
}

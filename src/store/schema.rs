use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Date,
    DateTime,
    Text,
}

/// One column of a table. `width` is the character capacity of a text column and
/// zero for everything else.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
    #[serde(default)]
    pub width: usize,
}

impl Column {
    fn new(name: &str, kind: ColumnType, width: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            width,
        }
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, ColumnType::Int, 0)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, ColumnType::Float, 0)
    }

    pub fn bool(name: &str) -> Self {
        Self::new(name, ColumnType::Bool, 0)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, ColumnType::Date, 0)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, ColumnType::DateTime, 0)
    }

    /// A text column that reserves at least `min_width` characters on first write.
    pub fn text(name: &str, min_width: usize) -> Self {
        Self::new(name, ColumnType::Text, min_width)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Whether rows laid out as `current` can be appended to a table persisted as
    /// `self`: same columns in the same order with the same types, and no text
    /// value wider than the persisted capacity.
    pub fn accepts(&self, current: &Schema) -> bool {
        self.columns.len() == current.columns.len()
            && self
                .columns
                .iter()
                .zip(&current.columns)
                .all(|(existing, incoming)| {
                    existing.name == incoming.name
                        && existing.kind == incoming.kind
                        && (existing.kind != ColumnType::Text || incoming.width <= existing.width)
                })
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for column in &self.columns {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match column.kind {
                ColumnType::Text => write!(f, "{}: text({})", column.name, column.width)?,
                kind => write!(f, "{}: {:?}", column.name, kind)?,
            }
        }
        Ok(())
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Control type of a field, named the way the Doctype API names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Data,
    #[serde(rename = "Small Text")]
    SmallText,
    Text,
    #[serde(rename = "Long Text")]
    LongText,
    Code,
    Color,
    Currency,
    Float,
    Int,
    Date,
    #[serde(rename = "Datetime", alias = "DateTime")]
    DateTime,
    Time,
    Duration,
    Check,
    Select,
    Link,
    Table,
    #[serde(rename = "Read Only", alias = "ReadOnly")]
    ReadOnly,
    Password,
    #[serde(rename = "Section Break", alias = "SectionBreak")]
    SectionBreak,
    #[serde(rename = "Column Break", alias = "ColumnBreak")]
    ColumnBreak,
    Barcode,
    Button,
    #[serde(rename = "Table MultiSelect", alias = "TableMultiSelect")]
    TableMultiSelect,
    Percent,
    Rating,
    Attach,
    Custom,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "Data",
            Self::SmallText => "Small Text",
            Self::Text => "Text",
            Self::LongText => "Long Text",
            Self::Code => "Code",
            Self::Color => "Color",
            Self::Currency => "Currency",
            Self::Float => "Float",
            Self::Int => "Int",
            Self::Date => "Date",
            Self::DateTime => "Datetime",
            Self::Time => "Time",
            Self::Duration => "Duration",
            Self::Check => "Check",
            Self::Select => "Select",
            Self::Link => "Link",
            Self::Table => "Table",
            Self::ReadOnly => "Read Only",
            Self::Password => "Password",
            Self::SectionBreak => "Section Break",
            Self::ColumnBreak => "Column Break",
            Self::Barcode => "Barcode",
            Self::Button => "Button",
            Self::TableMultiSelect => "Table MultiSelect",
            Self::Percent => "Percent",
            Self::Rating => "Rating",
            Self::Attach => "Attach",
            Self::Custom => "Custom",
        }
    }

    /// Pure layout entries that never carry a value.
    pub fn is_layout(&self) -> bool {
        matches!(self, Self::SectionBreak | Self::ColumnBreak)
    }

    /// Types that occupy a whole layout row instead of a grid cell.
    pub fn spans_full_width(&self) -> bool {
        matches!(
            self,
            Self::Table | Self::TableMultiSelect | Self::SectionBreak | Self::Custom
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int | Self::Float | Self::Currency | Self::Percent | Self::Rating
        )
    }

    /// Types that reference records of another collection.
    pub fn is_link(&self) -> bool {
        matches!(self, Self::Link | Self::TableMultiSelect)
    }

    /// Types whose value is stored in the form value tree.
    pub fn holds_value(&self) -> bool {
        !matches!(
            self,
            Self::SectionBreak | Self::ColumnBreak | Self::Button
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

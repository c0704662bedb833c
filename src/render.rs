//! Headless rendering dispatch.
//!
//! [`dispatch`] turns a descriptor plus its current value into a typed
//! [`Control`]; the host toolkit draws it. [`render_fields`] lays a field list
//! out in grid blocks, omitting hidden fields.

use crate::expression::is_visible;
use crate::schema::{FieldDescriptor, FieldRef, FieldType, Scope, TabbedLayout};
use crate::value::{Attachment, DurationValue, FieldValue, FormValues, RowRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Line,
    Password,
    Barcode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Int,
    Float,
    Currency,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateKind {
    Date,
    DateTime,
    Time,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    TextInput {
        value: String,
        kind: TextKind,
        pattern: Option<String>,
    },
    TextArea {
        value: String,
        rows: u8,
    },
    Code {
        value: String,
    },
    Color {
        value: String,
    },
    Number {
        value: Option<f64>,
        kind: NumberKind,
        min: Option<f64>,
        max: Option<f64>,
        step: Option<f64>,
    },
    Rating {
        value: f64,
    },
    DatePicker {
        value: String,
        kind: DateKind,
    },
    Duration {
        value: DurationValue,
    },
    Checkbox {
        checked: bool,
    },
    Select {
        value: String,
        options: Vec<String>,
    },
    LinkPicker {
        value: String,
        target: String,
    },
    MultiSelect {
        selected: Vec<String>,
        target: String,
    },
    Table {
        row_count: usize,
        columns: Vec<String>,
        show_download_upload: bool,
    },
    ReadOnly {
        value: String,
    },
    Attach {
        file: Option<String>,
        pending_upload: bool,
    },
    Button,
    Section,
    ColumnBreak,
    Custom {
        key: Option<String>,
    },
}

/// One control plus the descriptor bits every control needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedField {
    pub name: String,
    pub label: String,
    pub required: bool,
    pub read_only: bool,
    pub control: Control,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutBlock {
    Grid {
        columns: usize,
        fields: Vec<RenderedField>,
    },
    FullWidth(RenderedField),
}

fn text_of(value: Option<&FieldValue>) -> String {
    value.map(FieldValue::display_text).unwrap_or_default()
}

fn number_kind(field_type: FieldType) -> NumberKind {
    match field_type {
        FieldType::Int => NumberKind::Int,
        FieldType::Currency => NumberKind::Currency,
        FieldType::Percent => NumberKind::Percent,
        _ => NumberKind::Float,
    }
}

/// The control for `field` showing `value`.
pub fn dispatch(field: &FieldDescriptor, value: Option<&FieldValue>) -> RenderedField {
    let target = || field.link_target.clone().unwrap_or_default();

    let control = match field.field_type {
        FieldType::Data => Control::TextInput {
            value: text_of(value),
            kind: TextKind::Line,
            pattern: field.pattern.clone(),
        },
        FieldType::Password => Control::TextInput {
            value: text_of(value),
            kind: TextKind::Password,
            pattern: None,
        },
        FieldType::Barcode => Control::TextInput {
            value: text_of(value),
            kind: TextKind::Barcode,
            pattern: None,
        },
        FieldType::SmallText => Control::TextArea {
            value: text_of(value),
            rows: 2,
        },
        FieldType::Text => Control::TextArea {
            value: text_of(value),
            rows: 4,
        },
        FieldType::LongText => Control::TextArea {
            value: text_of(value),
            rows: 8,
        },
        FieldType::Code => Control::Code {
            value: text_of(value),
        },
        FieldType::Color => Control::Color {
            value: text_of(value),
        },
        FieldType::Int | FieldType::Float | FieldType::Currency | FieldType::Percent => {
            let (min, max) = field.bounds();
            Control::Number {
                value: value.and_then(FieldValue::as_f64),
                kind: number_kind(field.field_type),
                min,
                max,
                step: field.step,
            }
        }
        FieldType::Rating => Control::Rating {
            value: value.and_then(FieldValue::as_f64).unwrap_or_default(),
        },
        FieldType::Date => Control::DatePicker {
            value: text_of(value),
            kind: DateKind::Date,
        },
        FieldType::DateTime => Control::DatePicker {
            value: text_of(value),
            kind: DateKind::DateTime,
        },
        FieldType::Time => Control::DatePicker {
            value: text_of(value),
            kind: DateKind::Time,
        },
        FieldType::Duration => Control::Duration {
            value: match value {
                Some(FieldValue::Duration(d)) => *d,
                Some(other) => other
                    .as_f64()
                    .map(|s| DurationValue::from_seconds(s.max(0.0) as u64))
                    .unwrap_or_default(),
                None => DurationValue::default(),
            },
        },
        FieldType::Check => Control::Checkbox {
            checked: matches!(value, Some(FieldValue::Bool(true))),
        },
        FieldType::Select => Control::Select {
            value: text_of(value),
            options: field.option_values(),
        },
        FieldType::Link => Control::LinkPicker {
            value: text_of(value),
            target: target(),
        },
        FieldType::TableMultiSelect => {
            let key = field.entry_key();
            let selected = match value {
                Some(FieldValue::Entries(entries)) => entries
                    .iter()
                    .filter_map(|e| e.get(&key).and_then(|v| v.as_str()).map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            };
            Control::MultiSelect {
                selected,
                target: target(),
            }
        }
        FieldType::Table => Control::Table {
            row_count: value.and_then(FieldValue::rows).map_or(0, <[RowRecord]>::len),
            columns: field
                .columns()
                .iter()
                .filter(|c| c.field_type.holds_value())
                .map(|c| c.name.clone())
                .collect(),
            show_download_upload: field.show_download_upload,
        },
        FieldType::ReadOnly => Control::ReadOnly {
            value: text_of(value),
        },
        FieldType::Attach => match value {
            Some(FieldValue::Attachment(Attachment::Url(url))) => Control::Attach {
                file: Some(url.clone()),
                pending_upload: false,
            },
            Some(FieldValue::Attachment(Attachment::Pending { file_name, .. })) => {
                Control::Attach {
                    file: Some(file_name.clone()),
                    pending_upload: true,
                }
            }
            _ => Control::Attach {
                file: None,
                pending_upload: false,
            },
        },
        FieldType::Button => Control::Button,
        FieldType::SectionBreak => Control::Section,
        FieldType::ColumnBreak => Control::ColumnBreak,
        FieldType::Custom => Control::Custom {
            key: field.custom_element.clone(),
        },
    };

    RenderedField {
        name: field.name.clone(),
        label: field.display_label().to_string(),
        required: field.required,
        read_only: field.read_only || field.field_type == FieldType::ReadOnly,
        control,
    }
}

/// Lay `fields` out in `scope`. Hidden fields are left out; Column Break
/// closes the current grid block; full-width types get a block of their own.
pub fn render_fields(
    fields: &[FieldDescriptor],
    scope: &Scope<'_>,
    grid_columns: usize,
) -> Vec<LayoutBlock> {
    let mut blocks = Vec::new();
    let mut grid: Vec<RenderedField> = Vec::new();
    let columns = grid_columns.max(1);

    let close = |grid: &mut Vec<RenderedField>, blocks: &mut Vec<LayoutBlock>| {
        if !grid.is_empty() {
            blocks.push(LayoutBlock::Grid {
                columns,
                fields: std::mem::take(grid),
            });
        }
    };

    for field in fields {
        if !is_visible(field, scope) {
            continue;
        }
        if field.field_type == FieldType::ColumnBreak {
            close(&mut grid, &mut blocks);
            continue;
        }

        let rendered = dispatch(field, scope.resolve(&FieldRef::local(field.name.clone())));
        if field.field_type.spans_full_width() {
            close(&mut grid, &mut blocks);
            blocks.push(LayoutBlock::FullWidth(rendered));
        } else {
            grid.push(rendered);
        }
    }
    close(&mut grid, &mut blocks);
    blocks
}

pub fn render_tab(tab: &TabbedLayout, values: &FormValues, grid_columns: usize) -> Vec<LayoutBlock> {
    render_fields(&tab.fields, &Scope::form(values), grid_columns)
}

/// The columns of one table row, as the row editor shows them.
pub fn render_row(
    table: &FieldDescriptor,
    values: &FormValues,
    row: &RowRecord,
    grid_columns: usize,
) -> Vec<LayoutBlock> {
    render_fields(table.columns(), &Scope::row(values, row), grid_columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_names(block: &LayoutBlock) -> Vec<&str> {
        match block {
            LayoutBlock::Grid { fields, .. } => fields.iter().map(|f| f.name.as_str()).collect(),
            LayoutBlock::FullWidth(field) => vec![field.name.as_str()],
        }
    }

    #[test]
    fn test_dispatch_numeric_with_percent_bounds() {
        let field = FieldDescriptor::new("progress", "Progress", FieldType::Percent);
        let rendered = dispatch(&field, Some(&FieldValue::Float(40.0)));
        assert_eq!(
            rendered.control,
            Control::Number {
                value: Some(40.0),
                kind: NumberKind::Percent,
                min: Some(0.0),
                max: Some(100.0),
                step: None,
            }
        );
    }

    #[test]
    fn test_dispatch_select_and_read_only() {
        let field = FieldDescriptor::new("status", "Status", FieldType::Select)
            .with_options(["Open", "Closed"])
            .read_only();
        let rendered = dispatch(&field, Some(&FieldValue::text("Open")));
        assert!(rendered.read_only);
        assert_eq!(
            rendered.control,
            Control::Select {
                value: "Open".into(),
                options: vec!["Open".into(), "Closed".into()],
            }
        );

        let label = FieldDescriptor::new("code", "", FieldType::ReadOnly);
        let rendered = dispatch(&label, None);
        assert!(rendered.read_only);
        assert_eq!(rendered.label, "code");
    }

    #[test]
    fn test_layout_blocks() {
        let fields = vec![
            FieldDescriptor::new("a", "A", FieldType::Data),
            FieldDescriptor::new("b", "B", FieldType::Int),
            FieldDescriptor::new("cb", "", FieldType::ColumnBreak),
            FieldDescriptor::new("c", "C", FieldType::Check),
            FieldDescriptor::new("items", "Items", FieldType::Table)
                .with_columns(vec![FieldDescriptor::new("x", "X", FieldType::Data)]),
            FieldDescriptor::new("d", "D", FieldType::Date),
        ];
        let values = FormValues::seeded(&fields);
        let blocks = render_fields(&fields, &Scope::form(&values), 3);

        let names: Vec<Vec<&str>> = blocks.iter().map(field_names).collect();
        assert_eq!(names, vec![vec!["a", "b"], vec!["c"], vec!["items"], vec!["d"]]);
        assert!(matches!(blocks[2], LayoutBlock::FullWidth(_)));
    }

    #[test]
    fn test_hidden_fields_are_omitted() {
        let fields = vec![
            FieldDescriptor::new("lined", "Lined", FieldType::Check),
            FieldDescriptor::new("lining", "Lining", FieldType::Select)
                .with_options(["Concrete", "Clay"])
                .display_depends_on("lined == true"),
        ];
        let mut values = FormValues::seeded(&fields);
        let tab = TabbedLayout::new("Details", fields);

        let blocks = render_tab(&tab, &values, 3);
        assert_eq!(field_names(&blocks[0]), vec!["lined"]);

        values.set("lined", FieldValue::Bool(true));
        let blocks = render_tab(&tab, &values, 3);
        assert_eq!(field_names(&blocks[0]), vec!["lined", "lining"]);
    }

    #[test]
    fn test_row_rendering_resolves_cells() {
        let table = FieldDescriptor::new("items", "Items", FieldType::Table).with_columns(vec![
            FieldDescriptor::new("qty", "Qty", FieldType::Int),
        ]);
        let mut row = RowRecord::new();
        row.set("qty", FieldValue::Int(7));
        let blocks = render_row(&table, &FormValues::new(), &row, 2);
        match &blocks[0] {
            LayoutBlock::Grid { columns, fields } => {
                assert_eq!(*columns, 2);
                assert!(matches!(fields[0].control, Control::Number { value: Some(v), .. } if v == 7.0));
            }
            other => panic!("unexpected block {:?}", other),
        }
    }
}

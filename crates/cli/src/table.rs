// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared table renderer for CLI list views.
//!
//! Provides consistent column alignment and truncation across the list
//! commands.

/// Column text alignment.
#[derive(Clone, Copy)]
pub enum Align {
    Left,
    Right,
}

/// A column definition in a [`Table`].
pub struct Column {
    pub name: &'static str,
    pub align: Align,
    /// Maximum width (`None` = unlimited). Values exceeding this are
    /// truncated with an ellipsis.
    pub max_width: Option<usize>,
}

impl Column {
    /// Left-aligned, unlimited width.
    pub fn left(name: &'static str) -> Self {
        Self {
            name,
            align: Align::Left,
            max_width: None,
        }
    }

    /// Right-aligned, unlimited width.
    pub fn right(name: &'static str) -> Self {
        Self {
            name,
            align: Align::Right,
            max_width: None,
        }
    }

    /// Left-aligned with a width cap.
    pub fn capped(name: &'static str, max_width: usize) -> Self {
        Self {
            name,
            align: Align::Left,
            max_width: Some(max_width),
        }
    }
}

/// A simple monospace table.
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Add a row; missing cells render empty, extra cells are dropped.
    pub fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    fn cell_text(&self, row: usize, col: usize) -> String {
        let raw = self
            .rows
            .get(row)
            .and_then(|r| r.get(col))
            .cloned()
            .unwrap_or_default();
        match self.columns[col].max_width {
            Some(max) if raw.chars().count() > max => {
                let truncated: String = raw.chars().take(max.saturating_sub(1)).collect();
                format!("{truncated}…")
            }
            _ => raw,
        }
    }

    /// Render with a header line; rows are separated by newlines.
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.len()).collect();
        for row in 0..self.rows.len() {
            for col in 0..self.columns.len() {
                widths[col] = widths[col].max(self.cell_text(row, col).chars().count());
            }
        }

        let mut out = String::new();
        for (col, column) in self.columns.iter().enumerate() {
            if col > 0 {
                out.push_str("  ");
            }
            out.push_str(&pad(column.name, widths[col], column.align));
        }
        out.push('\n');

        for row in 0..self.rows.len() {
            for (col, column) in self.columns.iter().enumerate() {
                if col > 0 {
                    out.push_str("  ");
                }
                out.push_str(&pad(&self.cell_text(row, col), widths[col], column.align));
            }
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn pad(text: &str, width: usize, align: Align) -> String {
    let len = text.chars().count();
    let fill = width.saturating_sub(len);
    match align {
        Align::Left => format!("{text}{}", " ".repeat(fill)),
        Align::Right => format!("{}{text}", " ".repeat(fill)),
    }
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;

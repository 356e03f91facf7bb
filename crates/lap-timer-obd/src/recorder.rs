//! CSV recording, one row per completed sweep of the working set

use chrono::{DateTime, SecondsFormat, Utc};
use obd_poller::WorkingSet;
use obd_protocol::Value;
use std::io::{self, Write};
use tracing::debug;

/// Collects readings of one rotation and writes them as a CSV row
///
/// The row is written when the last command of the working set has been
/// recorded, stamped with the time of that reading. Null or failed readings
/// leave their cell empty.
pub struct SweepRecorder<W: Write> {
    writer: W,
    columns: Vec<&'static str>,
    cells: Vec<String>,
}

impl<W: Write> SweepRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            columns: Vec::new(),
            cells: Vec::new(),
        }
    }

    /// Use `working_set` as the columns, writing a header when it differs
    /// from the current one. Discards a partially recorded row.
    pub fn start(&mut self, working_set: &WorkingSet) -> io::Result<()> {
        let columns = working_set.names();
        self.cells = vec![String::new(); columns.len()];
        if columns == self.columns {
            return Ok(());
        }

        let mut header = String::from("Time");
        for name in &columns {
            header.push(',');
            header.push_str(name);
        }
        writeln!(self.writer, "{}", header)?;
        self.writer.flush()?;

        debug!("CSV header: {}", header);
        self.columns = columns;
        Ok(())
    }

    /// Record the reading of `name` taken at `time`
    pub fn record(&mut self, name: &str, value: Option<&Value>, time: DateTime<Utc>) -> io::Result<()> {
        let Some(index) = self.columns.iter().position(|c| *c == name) else {
            return Ok(());
        };

        self.cells[index] = value.map(cell).unwrap_or_default();
        if index + 1 == self.columns.len() {
            self.write_row(time)?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_row(&mut self, time: DateTime<Utc>) -> io::Result<()> {
        let mut row = time.to_rfc3339_opts(SecondsFormat::Millis, true);
        for cell in self.cells.iter_mut() {
            row.push(',');
            row.push_str(&escape(cell));
            cell.clear();
        }
        writeln!(self.writer, "{}", row)?;
        self.writer.flush()?;
        Ok(())
    }
}

fn cell(value: &Value) -> String {
    match value.magnitude() {
        Some(magnitude) => magnitude.to_string(),
        None => value.to_string(),
    }
}

fn escape(cell: &str) -> String {
    if cell.contains(|c: char| c == ',' || c == '"' || c == '\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

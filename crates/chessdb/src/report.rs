//! Mutex-guarded output sinks for query hits and duplicate reports.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

enum Sink {
    None,
    Stdout,
    Text(BufWriter<File>),
    /// JSON-lines mode, selected by a `.json` report path.
    Json(BufWriter<File>),
}

/// A shared output sink; one mutex per sink serializes writers.
pub struct Report {
    sink: Mutex<Sink>,
}

impl Report {
    /// A disabled sink; all writes are dropped.
    pub fn none() -> Self {
        Report {
            sink: Mutex::new(Sink::None),
        }
    }

    /// Reports to standard output.
    pub fn stdout() -> Self {
        Report {
            sink: Mutex::new(Sink::Stdout),
        }
    }

    /// Reports to a file; a `.json` extension selects JSON-lines output.
    pub fn file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        let sink = if path.extension().is_some_and(|e| e == "json") {
            Sink::Json(writer)
        } else {
            Sink::Text(writer)
        };
        Ok(Report {
            sink: Mutex::new(sink),
        })
    }

    /// True when writes go anywhere.
    pub fn is_on(&self) -> bool {
        !matches!(*self.sink.lock().expect("report lock"), Sink::None)
    }

    /// True when the sink emits JSON lines; callers use this to choose
    /// [`Report::record`] over plain text.
    pub fn is_json(&self) -> bool {
        matches!(*self.sink.lock().expect("report lock"), Sink::Json(_))
    }

    /// Writes one text block. In JSON mode the text is wrapped as
    /// `{"text": ...}`.
    pub fn print(&self, text: &str) {
        let mut sink = self.sink.lock().expect("report lock");
        let result = match &mut *sink {
            Sink::None => Ok(()),
            Sink::Stdout => {
                println!("{text}");
                Ok(())
            }
            Sink::Text(w) => writeln!(w, "{text}"),
            Sink::Json(w) => writeln!(w, "{}", serde_json::json!({ "text": text })),
        };
        if let Err(err) = result {
            tracing::error!("report write failed: {err}");
        }
    }

    /// Writes a structured record. Text sinks render it compactly.
    pub fn record(&self, value: serde_json::Value) {
        let mut sink = self.sink.lock().expect("report lock");
        let result = match &mut *sink {
            Sink::None => Ok(()),
            Sink::Stdout => {
                println!("{value}");
                Ok(())
            }
            Sink::Text(w) | Sink::Json(w) => writeln!(w, "{value}"),
        };
        if let Err(err) = result {
            tracing::error!("report write failed: {err}");
        }
    }

    /// Flushes buffered output.
    pub fn flush(&self) {
        let mut sink = self.sink.lock().expect("report lock");
        let result = match &mut *sink {
            Sink::Text(w) | Sink::Json(w) => w.flush(),
            _ => Ok(()),
        };
        if let Err(err) = result {
            tracing::error!("report flush failed: {err}");
        }
    }
}

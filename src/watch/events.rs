//! Change events and the `inotifywait -m -c` line codec.

use crate::watch::transport::TransportError;

/// One action token of a change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    Modified,
    Delete,
    /// Any other token; accepted and ignored by handlers.
    Other(String),
}

impl Action {
    /// `MODIFY` is what inotify prints; `MODIFIED` is accepted as well.
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "CREATE" => Action::Create,
            "MODIFY" | "MODIFIED" => Action::Modified,
            "DELETE" => Action::Delete,
            other => Action::Other(other.to_string()),
        }
    }
}

/// A `(directory, actions, filename)` triple from the change-event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub dir: String,
    pub actions: Vec<Action>,
    pub file: String,
}

impl ChangeEvent {
    pub fn new(dir: impl Into<String>, actions: Vec<Action>, file: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            actions,
            file: file.into(),
        }
    }

    /// Full path of the changed file.
    pub fn file_path(&self) -> String {
        join_path(&self.dir, &self.file)
    }

    /// Decode one CSV line: `dir,"A,B",file`.
    pub fn from_csv_line(line: &str) -> Result<Self, TransportError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(line.as_bytes());
        let record = match reader.records().next() {
            Some(Ok(record)) => record,
            Some(Err(e)) => return Err(TransportError::Protocol(format!("bad record {:?}: {}", line, e))),
            None => return Err(TransportError::Protocol(format!("empty record {:?}", line))),
        };
        match (record.len(), record.get(0), record.get(1), record.get(2)) {
            (3, Some(dir), Some(actions), Some(file)) => Ok(Self {
                dir: dir.to_string(),
                actions: actions.split(',').filter(|t| !t.is_empty()).map(Action::parse).collect(),
                file: file.to_string(),
            }),
            (n, ..) => Err(TransportError::Protocol(format!(
                "expected 3 fields, got {} in {:?}",
                n, line
            ))),
        }
    }
}

pub fn join_path(dir: &str, file: &str) -> String {
    if dir.is_empty() || dir.ends_with('/') {
        format!("{}{}", dir, file)
    } else {
        format!("{}/{}", dir, file)
    }
}

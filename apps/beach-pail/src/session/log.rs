//! Append-only session log shown to the user, one line per event.

pub const INITIALIZING: &str = "> SYSTEM: INITIALIZING NEW SESSION...";
pub const CONNECTING: &str = "> SYSTEM: CONNECTING TO SERVER...";
pub const CANCELLED: &str = "> SYSTEM: SESSION CANCELLED";
pub const CONNECTED: &str = "> NETWORK: CONNECTED";
pub const SENDING_REQUEST: &str = "> NETWORK: SENDING REQUEST";
pub const ARCHIVE_CREATED: &str = "> SUCCESS: ARCHIVE CREATED";
pub const AWAITING_CONFIRMATION: &str = "> WAITING FOR USER CONFIRMATION...";
pub const BACKEND_UNREACHABLE: &str = "> CRITICAL FAILURE: BACKEND UNREACHABLE";
pub const CONNECT_TIMED_OUT: &str = "> CRITICAL FAILURE: CONNECTION TIMED OUT";
pub const NO_RESPONSE: &str = "> CRITICAL FAILURE: NO RESPONSE FROM SERVER";
pub const CONNECTION_LOST: &str = "> CRITICAL FAILURE: CONNECTION LOST";
pub const MALFORMED_FRAME: &str = "> WARNING: MALFORMED FRAME IGNORED";

pub fn status_line(status: &str) -> String {
    format!("> {}", status.to_uppercase())
}

pub fn error_line(message: &str) -> String {
    format!("> ERROR: {}", message.to_uppercase())
}

pub fn malformed_field_line(field: &str) -> String {
    format!("> WARNING: MALFORMED FIELD IGNORED: {}", field.to_uppercase())
}

/// Ordered record of status lines. Lines are never edited, removed or
/// reordered; `append` is the only mutator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogAggregator {
    lines: Vec<String>,
}

impl LogAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every fresh session starts with.
    pub fn for_new_session() -> Self {
        Self {
            lines: vec![INITIALIZING.to_owned(), CONNECTING.to_owned()],
        }
    }

    pub fn append(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_append_order_and_duplicates() {
        let mut log = LogAggregator::new();
        log.append(status_line("processed: 1/2"));
        log.append(status_line("processed: 1/2"));
        log.append(CONNECTION_LOST);
        assert_eq!(
            log.lines(),
            [
                "> PROCESSED: 1/2",
                "> PROCESSED: 1/2",
                "> CRITICAL FAILURE: CONNECTION LOST"
            ]
        );
    }

    #[test]
    fn new_session_log_has_two_entries() {
        let log = LogAggregator::for_new_session();
        assert_eq!(log.lines(), [INITIALIZING, CONNECTING]);
    }

    #[test]
    fn error_line_uppercases_message() {
        assert_eq!(error_line("invalid url"), "> ERROR: INVALID URL");
    }

    #[test]
    fn malformed_field_line_names_the_field() {
        assert_eq!(
            malformed_field_line("download_url"),
            "> WARNING: MALFORMED FIELD IGNORED: DOWNLOAD_URL"
        );
    }
}

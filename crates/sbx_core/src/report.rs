/// Outcome of one copy-pipeline run, returned to the caller for printing.
/// The pipeline never prints or keeps global state; the caller decides what
/// to do with the report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// `bucket/key` locations written to the destination.
    pub copied_objects: Vec<String>,
    /// `bucket/key` locations skipped because the destination already held
    /// an identical object.
    pub skipped_objects: Vec<String>,
    /// Table records written to the destination.
    pub copied_records: usize,
    /// Experiments whose parameter hash was recomputed.
    pub rehashed_experiments: Vec<String>,
    /// Per-item failures that were logged and skipped.
    pub failures: Vec<CopyFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFailure {
    /// `bucket/key` or `table/experiment` the failure belongs to.
    pub location: String,
    pub message: String,
}

impl CopyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_failure(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.failures.push(CopyFailure {
            location: location.into(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tracks_failures() {
        let mut report = CopyReport::default();
        assert!(report.is_clean());

        report.record_failure("bucket/key", "access denied");
        assert!(!report.is_clean());
        assert_eq!(report.failures[0].location, "bucket/key");
    }
}

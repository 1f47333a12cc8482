pub mod experiment;
pub mod rds;
pub mod rotate_ci;
pub mod stage;
pub mod unstage;

use indicatif::{ProgressBar, ProgressStyle};
use sbx_pipeline::copy::CopyEvent;
use sbx_pipeline::teardown::TeardownEvent;

use crate::term;

/// Spinner used by the copy/teardown loops.
pub fn progress_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("spinner template is valid"),
    );
    spinner
}

pub fn render_copy_event(spinner: &ProgressBar, event: &CopyEvent) {
    match event {
        CopyEvent::BucketStarted { source, target } => {
            spinner.set_message(format!("copying {source} -> {target}"));
        }
        CopyEvent::ObjectCopied { bucket, key } => {
            spinner.println(format!("copied {bucket}/{key}"));
        }
        CopyEvent::ObjectSkipped { bucket, key } => {
            spinner.println(format!("up to date {bucket}/{key}"));
        }
        CopyEvent::ObjectFailed {
            bucket,
            key,
            message,
        } => {
            spinner.println(format!("failed to copy {bucket}/{key}: {message}"));
        }
        CopyEvent::TableStarted { source, target } => {
            spinner.set_message(format!("copying records {source} -> {target}"));
        }
        CopyEvent::RecordsWritten {
            table,
            experiment,
            count,
        } => {
            spinner.println(format!("wrote {count} record(s) for {experiment} into {table}"));
        }
        CopyEvent::RecordFailed {
            table,
            experiment,
            message,
        } => {
            spinner.println(format!(
                "failed to write records for {experiment} into {table}: {message}"
            ));
        }
        CopyEvent::HashRecomputed { experiment } => {
            spinner.println(format!("recomputed pipeline parameters for {experiment}"));
        }
    }
}

pub fn render_teardown_event(spinner: &ProgressBar, event: &TeardownEvent) {
    match event {
        TeardownEvent::NoStagedExperiments { table } => {
            spinner.println(format!("no scoped experiments registered in table {table}"));
        }
        TeardownEvent::TableStarted { table } => {
            spinner.set_message(format!("removing records from {table}"));
        }
        TeardownEvent::TableSkipped { table } => {
            spinner.println(format!("no records to delete in table {table}, skipping"));
        }
        TeardownEvent::RecordDeleted { table, experiment } => {
            spinner.println(format!("deleted {experiment} from {table}"));
        }
        TeardownEvent::RecordFailed {
            table,
            experiment,
            message,
        } => {
            spinner.println(format!(
                "failed to delete {experiment} from {table}: {message}"
            ));
        }
        TeardownEvent::BucketSkipped { bucket } => {
            spinner.println(format!("no files to delete in bucket {bucket}, skipping"));
        }
        TeardownEvent::ObjectsDeleted { bucket, count } => {
            spinner.println(format!("deleted {count} object(s) from {bucket}"));
        }
        TeardownEvent::ObjectsFailed { bucket, message } => {
            spinner.println(format!("failed to delete objects from {bucket}: {message}"));
        }
    }
}

/// Print the failure section of a report, if any, and return whether the
/// run was clean.
pub fn report_failures(failures: &[sbx_core::report::CopyFailure]) -> bool {
    if failures.is_empty() {
        return true;
    }

    term::warn("some items could not be processed:");
    for failure in failures {
        term::bullet(&format!("{}: {}", failure.location, failure.message));
    }
    false
}

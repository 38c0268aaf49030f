use std::io::{self, Write};

use serde::Serialize;

use crate::app::{MetadataResult, ProgressEvent, ProgressSink, StatusResult};
use crate::download::DownloadReport;
use crate::library::ReconcileReport;
use crate::purge::{DeleteReport, PruneReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_metadata(result: &MetadataResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_prune(result: &PruneReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_reindex(result: &ReconcileReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_delete(result: &DeleteReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress goes to the tracing log; stdout is reserved for the JSON result.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        tracing::debug!(message = %event.message, "progress");
    }
}

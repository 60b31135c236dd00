use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// What `finalize` does with marks that were never submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizePolicy {
    /// Fail with `unsaved_marks` and leave the session open.
    #[default]
    Refuse,
    /// Submit first; finalize only when every row was written.
    Submit,
    /// Drop unsaved marks and end the session anyway.
    Discard,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "rollcalld", version, about = "Attendance sidecar speaking JSON lines over stdio")]
pub struct Config {
    /// Workspace directory to open on startup (otherwise wait for `workspace.select`).
    #[arg(long, env = "ROLLCALLD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log filter directive; logs go to stderr.
    #[arg(long, env = "ROLLCALLD_LOG", default_value = "info")]
    pub log_level: String,

    /// Default handling of unsaved marks on `session.finalize`.
    #[arg(
        long,
        env = "ROLLCALLD_FINALIZE_POLICY",
        value_enum,
        default_value_t = FinalizePolicy::Refuse
    )]
    pub finalize_policy: FinalizePolicy,
}

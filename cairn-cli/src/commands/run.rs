//! `cairn run`: stage then publish.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use super::publish::{print_report, publish};
use super::stage::stage;
use super::{exit_for, Session};
use crate::{CollapseArg, GlobalArgs};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Version name the build is published under.
    pub version: String,

    /// Directory to upload (default: `staging_dir` from the config).
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Drop builds whose current.json no longer resolves.
    #[arg(long)]
    pub purge: bool,

    /// Collapse mode override (default: from config).
    #[arg(long)]
    pub collapse: Option<CollapseArg>,
}

impl RunArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::open(global)?;
        let staged = stage(&session, &self.version, self.dir)?;
        tracing::info!(version = %staged.version, cid = %staged.root.cid, "staged, publishing");
        let report = publish(&session, self.purge, self.collapse)?;
        print_report(&report);
        Ok(exit_for(report.outcome.is_changed()))
    }
}

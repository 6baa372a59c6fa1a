//! `cairn stage`: upload a build directory.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use cairn_publish::Staged;

use super::{block_on, Session};
use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct StageArgs {
    /// Version name the build is published under (e.g. `1.4.0-build`).
    pub version: String,

    /// Directory to upload (default: `staging_dir` from the config).
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

impl StageArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::open(global)?;
        let staged = stage(&session, &self.version, self.dir)?;
        print_staged(&staged, &session);
        Ok(ExitCode::SUCCESS)
    }
}

pub(crate) fn stage(session: &Session, version: &str, dir: Option<PathBuf>) -> Result<Staged> {
    let pipeline = session.pipeline(None);
    block_on(pipeline.stage(dir.as_deref(), version))?
        .with_context(|| format!("failed to stage version '{version}'"))
}

fn print_staged(staged: &Staged, session: &Session) {
    println!(
        "{} {} -> {}",
        "staged".green().bold(),
        staged.version,
        staged.root.cid
    );
    println!(
        "  {} files, {} bytes{}",
        staged.files,
        staged.root.size,
        if staged.generated_manifest {
            ", current.json generated"
        } else {
            ""
        }
    );
    println!("  descriptor: {}", session.config.descriptor.display());
}

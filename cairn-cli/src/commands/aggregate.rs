//! `cairn aggregate`: rebuild the production tree from the published raw trees.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use super::publish::print_production;
use super::{block_on, exit_for, Session};
use crate::{CollapseArg, GlobalArgs};

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// Drop builds whose current.json no longer resolves.
    #[arg(long)]
    pub purge: bool,

    /// How far emptied directories collapse after a purge (default: from config).
    #[arg(long)]
    pub collapse: Option<CollapseArg>,
}

impl AggregateArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::open(global)?;
        let pipeline = session.pipeline(self.collapse.map(Into::into));
        let result = block_on(pipeline.publish_production(self.purge))?
            .context("production aggregation failed")?;
        print_production(&result);
        Ok(exit_for(result.changed))
    }
}

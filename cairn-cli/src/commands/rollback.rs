//! `cairn rollback`: move a key back one generation.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;

use cairn_publish::RollbackTarget;

use super::publish::print_pins;
use super::{block_on, Session};
use crate::GlobalArgs;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Target {
    Raw,
    Production,
}

impl From<Target> for RollbackTarget {
    fn from(t: Target) -> Self {
        match t {
            Target::Raw => RollbackTarget::Raw,
            Target::Production => RollbackTarget::Production,
        }
    }
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Which tree to roll back.
    #[arg(value_enum)]
    pub target: Target,
}

impl RollbackArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::open(global)?;
        let target = RollbackTarget::from(self.target);
        let pipeline = session.pipeline(None);
        let rollback = block_on(pipeline.rollback(target))?
            .with_context(|| format!("{target} rollback failed"))?;

        println!(
            "{} {} ({}) {} -> {}",
            "rolled back".green().bold(),
            rollback.target,
            rollback.key,
            rollback.from,
            rollback.to
        );
        print_pins(&rollback.pins);
        Ok(ExitCode::SUCCESS)
    }
}

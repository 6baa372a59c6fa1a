//! `cairn publish`: raw tree, production tree, optional warm fetch.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use cairn_publish::{
    PinReport, ProductionResult, PublishOutcome, RawReconcile, RunReport, Sweep,
};

use super::{block_on, exit_for, Session};
use crate::{CollapseArg, GlobalArgs};

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Drop builds whose current.json no longer resolves.
    #[arg(long)]
    pub purge: bool,

    /// How far emptied directories collapse after a purge (default: from config).
    #[arg(long)]
    pub collapse: Option<CollapseArg>,
}

impl PublishArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::open(global)?;
        let report = publish(&session, self.purge, self.collapse)?;
        print_report(&report);
        Ok(exit_for(report.outcome.is_changed()))
    }
}

pub(crate) fn publish(
    session: &Session,
    purge: bool,
    collapse: Option<CollapseArg>,
) -> Result<RunReport> {
    let pipeline = session.pipeline(collapse.map(Into::into));
    block_on(pipeline.publish(purge))?.context("publication failed")
}

pub(crate) fn print_report(report: &RunReport) {
    print_raw(&report.raw);
    print_production(&report.production);
    if let Some(warm) = &report.warm {
        println!(
            "{} {} requested, {} failed",
            "warm".cyan().bold(),
            warm.requested,
            warm.failed
        );
    }
    match &report.outcome {
        PublishOutcome::Published { .. } => println!("{}", "published".green().bold()),
        PublishOutcome::Unchanged { .. } => println!("{}", "nothing changed".yellow().bold()),
    }
}

fn print_raw(raw: &RawReconcile) {
    let state = if raw.already_published {
        "already published".yellow().to_string()
    } else {
        "updated".green().to_string()
    };
    println!("{} {} ({state})", "raw".bold(), raw.root);
    if let Some(previous) = &raw.previous {
        println!("  previous: {previous}");
    }
    if let Some(pins) = &raw.pins {
        print_pins(pins);
    }
}

pub(crate) fn print_production(production: &ProductionResult) {
    let state = if production.changed {
        "updated".green().to_string()
    } else {
        "unchanged".yellow().to_string()
    };
    println!("{} {} ({state})", "production".bold(), production.root);
    print_sweep(&production.sweep);
    if let Some(pins) = &production.pins {
        print_pins(pins);
    }
}

fn print_sweep(sweep: &Sweep) {
    println!(
        "  {} live, {} retained, {} purged",
        sweep.live.len(),
        sweep.retained.len(),
        sweep.purged.len()
    );
    for path in &sweep.purged {
        println!("    {} {path}", "-".red());
    }
}

pub(crate) fn print_pins(pins: &PinReport) {
    match &pins.unpinned {
        Some(outcome) => println!("  pins: unpin {outcome}, pin {}", pins.pinned),
        None => println!("  pins: pin {}", pins.pinned),
    }
}

//! `cairn status`: checkpointed roots and, optionally, where the names point now.

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use cairn_core::{descriptor, BuildDescriptor, Cid};
use cairn_publish::NamePublisher;

use super::{block_on, Session};
use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also resolve both keys against the node.
    #[arg(long)]
    pub resolve: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::open(global)?;
        let d = descriptor::load(&session.config.descriptor)
            .context("failed to read build descriptor")?;

        let mut trees = vec![
            TreeStatus {
                tree: "raw",
                key: session.config.raw_key.clone(),
                current: d.current_raw_build.clone(),
                previous: d.previous_raw_build.clone(),
                resolved: None,
            },
            TreeStatus {
                tree: "production",
                key: session.config.production_key.clone(),
                current: d.current_build.clone(),
                previous: d.previous_build.clone(),
                resolved: None,
            },
        ];
        if self.resolve {
            resolve_all(&session, &mut trees)?;
        }

        if self.json {
            print_json(&d, trees)?;
        } else {
            print_table(&d, trees);
        }
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Debug, Clone)]
struct TreeStatus {
    tree: &'static str,
    key: String,
    current: Option<Cid>,
    previous: Option<Cid>,
    /// `Some(None)` means the name was resolved and points nowhere.
    resolved: Option<Option<Cid>>,
}

#[derive(Serialize)]
struct StatusJson {
    version: Option<String>,
    source: Option<String>,
    updated_at: Option<String>,
    trees: Vec<TreeStatusJson>,
}

#[derive(Serialize)]
struct TreeStatusJson {
    tree: &'static str,
    key: String,
    current: Option<String>,
    previous: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_sync: Option<bool>,
}

#[derive(Tabled)]
struct TreeTableRow {
    #[tabled(rename = "tree")]
    tree: String,
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "current")]
    current: String,
    #[tabled(rename = "previous")]
    previous: String,
    #[tabled(rename = "name")]
    name: String,
}

fn resolve_all(session: &Session, trees: &mut [TreeStatus]) -> Result<()> {
    let names = NamePublisher::new(&session.store);
    block_on(async {
        for tree in trees.iter_mut() {
            let resolved = names
                .resolve_key(&tree.key)
                .await
                .with_context(|| format!("failed to resolve key '{}'", tree.key))?;
            tree.resolved = Some(resolved);
        }
        Ok::<_, anyhow::Error>(())
    })?
}

impl TreeStatus {
    fn in_sync(&self) -> Option<bool> {
        self.resolved.as_ref().map(|r| *r == self.current)
    }
}

fn print_json(d: &BuildDescriptor, trees: Vec<TreeStatus>) -> Result<()> {
    let payload = StatusJson {
        version: d.version.clone(),
        source: d.source_uri.clone(),
        updated_at: d.updated_at.map(|t| t.to_rfc3339()),
        trees: trees
            .into_iter()
            .map(|t| TreeStatusJson {
                in_sync: t.in_sync(),
                tree: t.tree,
                key: t.key,
                current: t.current.map(|c| c.to_string()),
                previous: t.previous.map(|c| c.to_string()),
                resolved: t.resolved.map(|r| r.map(|c| c.to_string())),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(d: &BuildDescriptor, trees: Vec<TreeStatus>) {
    println!(
        "cairn v{} | version {} | updated {}",
        env!("CARGO_PKG_VERSION"),
        d.version.as_deref().unwrap_or("-").bold(),
        d.updated_at.map(format_age).unwrap_or_else(|| "never".into()),
    );
    if let Some(source) = &d.source_uri {
        println!("staged: {source}");
    }

    let rows: Vec<TreeTableRow> = trees
        .into_iter()
        .map(|t| TreeTableRow {
            name: name_label(&t),
            tree: t.tree.to_string(),
            key: t.key,
            current: cid_or_dash(t.current.as_ref()),
            previous: cid_or_dash(t.previous.as_ref()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn name_label(tree: &TreeStatus) -> String {
    match (&tree.resolved, tree.in_sync()) {
        (None, _) => "-".bright_black().to_string(),
        (Some(None), _) => "UNRESOLVED".yellow().bold().to_string(),
        (Some(Some(_)), Some(true)) => "CURRENT".green().bold().to_string(),
        (Some(Some(cid)), _) => format!("{} {cid}", "DIVERGED".red().bold()),
    }
}

fn cid_or_dash(cid: Option<&Cid>) -> String {
    cid.map(|c| c.to_string()).unwrap_or_else(|| "-".into())
}

fn format_age(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

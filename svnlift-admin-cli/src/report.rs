//! Human and JSON output for the inspection commands

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use svnlift_core::{Branch, DumpReader, EntryKind, NodeInfo, Repository, Verification};

/// One line of `branches` output
#[derive(Debug, Serialize)]
pub struct BranchSummary<'a> {
    pub path: &'a str,
    pub name: &'a str,
    pub created: u64,
    pub deleted: Option<u64>,
    pub tag: bool,
    pub pure: bool,
    pub origin: Option<String>,
    pub revisions: usize,
}

impl<'a> From<&'a Branch> for BranchSummary<'a> {
    fn from(branch: &'a Branch) -> Self {
        Self {
            path: branch.name(),
            name: branch.display_name(),
            created: branch.created(),
            deleted: branch.deleted(),
            tag: branch.is_tag(),
            pure: branch.is_pure(),
            origin: branch.origin().map(|o| format!("{}@{}", o.path, o.revision)),
            revisions: branch.activity().count(),
        }
    }
}

pub fn print_info(repo: &Repository<File>, out: &mut impl Write) -> Result<()> {
    let preamble = repo.preamble();
    writeln!(out, "UUID: {}", preamble.uuid)?;
    writeln!(out, "Format: {}", preamble.format_version)?;
    match repo.head() {
        Some(head) => writeln!(out, "Head revision: {}", head)?,
        None => writeln!(out, "Head revision: (none)")?,
    }
    writeln!(out, "Revisions: {}", repo.revisions().count())?;
    writeln!(out, "Node changes: {}", repo.node_count())?;
    writeln!(out, "Blobs: {}", repo.blobs().len())?;
    writeln!(out, "Tree nodes: {}", repo.arena().len())?;
    let branches = repo.branches();
    let (tags, lines): (Vec<&Branch>, Vec<&Branch>) = branches.live_branches().partition(|b| b.is_tag());
    writeln!(out, "Live branches: {}", lines.len())?;
    writeln!(out, "Live tags: {}", tags.len())?;
    writeln!(out, "Deleted: {}", branches.dead_branches().count())?;
    Ok(())
}

/// Revision log straight from the reader; no replay
pub fn print_log(path: &Path, out: &mut impl Write) -> Result<()> {
    let mut reader = DumpReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    for record in reader.revisions() {
        let record = record?;
        let date = record
            .date()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let message = record
            .log_message()
            .and_then(|m| m.lines().next())
            .unwrap_or("");
        writeln!(
            out,
            "r{} | {} | {} | {} changes | {}",
            record.revision,
            record.author().unwrap_or("(no author)"),
            date,
            record.nodes.len(),
            message
        )?;
    }
    Ok(())
}

pub fn print_branches(repo: &Repository<File>, json: bool, out: &mut impl Write) -> Result<()> {
    let tracker = repo.branches();
    let summaries: Vec<BranchSummary> = tracker
        .live_branches()
        .chain(tracker.dead_branches())
        .map(BranchSummary::from)
        .collect();

    if json {
        serde_json::to_writer_pretty(&mut *out, &summaries)?;
        writeln!(out)?;
        return Ok(());
    }
    for s in &summaries {
        let lifetime = match s.deleted {
            Some(deleted) => format!("r{}-r{}", s.created, deleted),
            None => format!("r{}-", s.created),
        };
        let mut flags = Vec::new();
        if s.tag {
            flags.push("tag");
        }
        if s.pure {
            flags.push("pure");
        }
        writeln!(
            out,
            "{:<30} {:<40} {:<14} {}",
            s.name,
            s.path,
            lifetime,
            flags.join(",")
        )?;
    }
    Ok(())
}

pub fn print_listing(repo: &Repository<File>, revision: u64, path: &str, out: &mut impl Write) -> Result<()> {
    for (name, info) in repo.list_dir(revision, path)? {
        writeln!(out, "{} {}", describe(&info), display_entry(&name, &info))?;
    }
    Ok(())
}

/// Stream a file's content from the dump
pub fn cat(
    repo: &mut Repository<File>,
    revision: u64,
    path: &str,
    verification: Verification,
    out: &mut impl Write,
) -> Result<()> {
    let info = repo.resolve_path(revision, path)?;
    if info.kind.is_dir() {
        anyhow::bail!("{} is a directory in r{}", path, revision);
    }
    let Some(hash) = info.content else {
        anyhow::bail!("{} has no recorded content in r{}", path, revision);
    };
    repo.stream_blob(&hash, out, verification)?;
    Ok(())
}

fn describe(info: &NodeInfo) -> String {
    match (info.kind, info.content) {
        (EntryKind::Root | EntryKind::Directory, _) => format!("{:<7} {:<40}", "dir", "-"),
        (EntryKind::ExecutableFile, Some(hash)) => format!("{:<7} {}", "exec", hash),
        (_, Some(hash)) => format!("{:<7} {}", "file", hash),
        (_, None) => format!("{:<7} {:<40}", "file", "?"),
    }
}

fn display_entry(name: &str, info: &NodeInfo) -> String {
    if info.kind.is_dir() {
        format!("{}/", name)
    } else {
        name.to_string()
    }
}

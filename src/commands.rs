//! One-shot CLI commands operating directly on the store.

use crate::{
    config::{AppConfig, Command},
    services::storage_service::{self, ListParams, StorageError, StorageService},
};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::io::Write;
use tokio_util::io::ReaderStream;

/// Result of a command that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    NotFound,
}

/// Execute `command`, writing user-facing output to `out`.
///
/// `Command::Serve` is handled by the binary and is rejected here.
pub async fn run<W: Write>(
    command: Command,
    storage: &StorageService,
    cfg: &AppConfig,
    out: &mut W,
) -> Result<Outcome> {
    match command {
        Command::Serve => anyhow::bail!("serve is not a one-shot command"),
        Command::Add { path } => {
            let obj = storage.add_file(&path).await?;
            writeln!(out, "Added: {} ({})", obj.cid, obj.name)?;
        }
        Command::AddJson { path, name } => {
            let raw = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_slice(&raw)
                .with_context(|| format!("parsing {} as JSON", path.display()))?;
            let default_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            let name = name.or(default_name);
            let obj = storage.add_json(&value, name.as_deref()).await?;
            writeln!(out, "Added: {} ({})", obj.cid, obj.name)?;
        }
        Command::Ls { cid } => {
            let objects = match cid {
                Some(cid) => {
                    let listed = storage
                        .ls(ListParams {
                            cid: Some(cid),
                            ..ListParams::default()
                        })
                        .await;
                    match found(listed)? {
                        Some(page) if !page.objects.is_empty() => page.objects,
                        _ => return not_found(out),
                    }
                }
                None => storage.ls_all().await?,
            };
            for obj in objects {
                writeln!(out, "{} {} ({} bytes)", obj.cid, obj.name, obj.size_bytes)?;
            }
        }
        Command::Get { cid } => match found(storage.get(&cid).await)? {
            Some(obj) => writeln!(out, "{}", serde_json::to_string_pretty(&obj)?)?,
            None => return not_found(out),
        },
        Command::Cat { cid } => match found(storage.open(&cid).await)? {
            Some((_, file)) => {
                let mut stream = ReaderStream::new(file);
                while let Some(chunk) = stream.next().await {
                    out.write_all(&chunk?)?;
                }
                out.flush()?;
            }
            None => return not_found(out),
        },
        Command::Stat { cid } => match found(storage.stat(&cid).await)? {
            Some(stat) => writeln!(out, "{}", serde_json::to_string_pretty(&stat)?)?,
            None => return not_found(out),
        },
        Command::Pin { cid } => match found(storage.pin(&cid).await)? {
            Some(obj) => writeln!(out, "Pinned: {}", obj.cid)?,
            None => return not_found(out),
        },
        Command::Unpin { cid } => match found(storage.unpin(&cid).await)? {
            Some(obj) => writeln!(out, "Unpinned: {}", obj.cid)?,
            None => return not_found(out),
        },
        Command::Gc { max_age_hours } => {
            let max_age = match max_age_hours {
                Some(hours) => storage_service::max_age_hours(hours)
                    .with_context(|| format!("--max-age-hours {} is out of range", hours))?,
                None => cfg.gc_max_age(),
            };
            let report = storage.gc(max_age).await?;
            writeln!(out, "Garbage collected {} objects", report.removed.len())?;
            if !report.failed.is_empty() {
                writeln!(
                    out,
                    "Could not delete payloads for {} objects",
                    report.failed.len()
                )?;
            }
        }
        Command::Url { cid, gateway } => {
            match found(storage.public_url(&cid, gateway.as_deref()))? {
                Some(url) => writeln!(out, "{}", url)?,
                None => return not_found(out),
            }
        }
        Command::Export { output, cids } => {
            let export = storage.export_car_to(&cids, &output).await?;
            writeln!(
                out,
                "Exported {} objects to {}",
                export.objects.len(),
                output.display()
            )?;
        }
    }
    Ok(Outcome::Done)
}

/// Turn lookups of unknown (or malformed) CIDs into `None`.
fn found<T>(result: Result<T, StorageError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StorageError::NotFound(_) | StorageError::InvalidCid(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn not_found<W: Write>(out: &mut W) -> Result<Outcome> {
    writeln!(out, "Not found")?;
    Ok(Outcome::NotFound)
}

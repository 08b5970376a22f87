//! Feature registry commands

use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use super::{
    CreateBulkArgs, IndexArgs, RegressionArgs, SkipArgs, ValidateArgs, Workspace, print_json,
};
use crate::error::BuilderError;
use crate::feature::NewFeature;
use crate::ralph::{CommandFixer, CommandStepRunner, NoFix, RalphConfig, ValidationLoop};

pub fn status(ws: &Workspace) -> anyhow::Result<()> {
    print_json(&ws.registry().stats()?)
}

pub fn list(ws: &Workspace) -> anyhow::Result<()> {
    print_json(&ws.registry().list()?)
}

pub fn get_next(ws: &Workspace) -> anyhow::Result<()> {
    print_json(&ws.registry().get_next()?)
}

pub fn start(ws: &Workspace, args: IndexArgs) -> anyhow::Result<()> {
    print_json(&ws.registry().mark_in_progress(args.index)?)
}

pub fn mark_complete(ws: &Workspace, args: IndexArgs) -> anyhow::Result<()> {
    print_json(&ws.registry().mark_passing(args.index)?)
}

pub fn mark_skip(ws: &Workspace, args: SkipArgs) -> anyhow::Result<()> {
    print_json(&ws.registry().mark_skip(args.index, &args.reason)?)
}

pub fn clear(ws: &Workspace, args: IndexArgs) -> anyhow::Result<()> {
    print_json(&ws.registry().clear_in_progress(args.index)?)
}

pub fn regression(ws: &Workspace, args: RegressionArgs) -> anyhow::Result<()> {
    let n = args.limit.unwrap_or(ws.config.registry.regression_limit);
    print_json(&ws.registry().get_for_regression(n)?)
}

/// Accepts a bare array or `{"features": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum BulkInput {
    List(Vec<NewFeature>),
    Wrapped { features: Vec<NewFeature> },
}

pub async fn create_bulk(ws: &Workspace, args: CreateBulkArgs) -> anyhow::Result<()> {
    let raw = if args.file.as_os_str() == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("reading features from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(&args.file)
            .await
            .map_err(|err| BuilderError::io(&args.file, err))?
    };
    let features = match serde_json::from_str::<BulkInput>(&raw)
        .map_err(|err| BuilderError::json(&args.file, err))?
    {
        BulkInput::List(features) | BulkInput::Wrapped { features } => features,
    };

    let batch = ws
        .registry()
        .blocking(move |r| r.create_bulk(features))
        .await?;
    for (index, warning) in &batch.warnings {
        eprintln!("warning: feature {index}: {}", warning.message());
    }
    print_json(&batch)
}

pub async fn validate(ws: &Workspace, args: ValidateArgs) -> anyhow::Result<()> {
    let config = RalphConfig {
        max_attempts: args.max_attempts.unwrap_or(ws.config.ralph.max_attempts),
        ..ws.config.ralph.clone()
    };
    let timeout = Duration::from_secs(config.step_timeout_secs);
    let root = ws.paths.root().to_path_buf();
    let runner = CommandStepRunner::new(args.exec, &root, timeout);
    let registry = ws.registry();

    let outcome = match args.fix {
        Some(fix) => {
            ValidationLoop::new(config, runner, CommandFixer::new(fix, &root, timeout))
                .gate(&registry, args.index)
                .await?
        }
        None => {
            ValidationLoop::new(config, runner, NoFix)
                .gate(&registry, args.index)
                .await?
        }
    };

    print_json(&outcome)?;
    // Last line of stdout, for callers that only scan for the marker
    println!("{}", outcome.sentinel());
    Ok(())
}

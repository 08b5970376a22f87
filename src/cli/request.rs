//! Request routing commands

use std::time::Duration;

use super::{ApprovalArgs, RequestArgs, Workspace, print_json};
use crate::config::AuthorMode;
use crate::error::BuilderError;
use crate::feature::FeatureRegistry;
use crate::router::{
    Author, CommandAuthor, DeclaredType, HeuristicAuthor, Pipeline, PipelineOutcome, Request,
};
use crate::store::FileStore;

const AUTHOR_TIMEOUT: Duration = Duration::from_secs(600);

fn author(ws: &Workspace) -> crate::error::Result<Box<dyn Author>> {
    let credential = ws.config.require_credential()?;
    let author: Box<dyn Author> = match ws.config.author.mode {
        AuthorMode::Heuristic => Box::new(HeuristicAuthor),
        AuthorMode::Command => {
            let command = ws.config.author.command.clone().ok_or_else(|| {
                BuilderError::Config(
                    "author.mode is command but author.command is not set".into(),
                )
            })?;
            Box::new(CommandAuthor::new(
                command,
                ws.config.author.credential_env.clone(),
                credential,
                AUTHOR_TIMEOUT,
            ))
        }
    };
    Ok(author)
}

fn pipeline<'a>(
    ws: &Workspace,
    registry: &'a FeatureRegistry<FileStore>,
) -> crate::error::Result<Pipeline<'a, Box<dyn Author>, FileStore>> {
    Ok(Pipeline::new(ws.paths.clone(), author(ws)?, registry)
        .with_big_threshold(ws.config.router.big_threshold)
        .with_lock_timeout(ws.config.store.lock_timeout()))
}

fn report(outcome: &PipelineOutcome) -> anyhow::Result<()> {
    if let PipelineOutcome::Created { warnings, .. } = outcome {
        for (index, warning) in warnings {
            eprintln!("warning: feature {index}: {}", warning.message());
        }
    }
    print_json(outcome)
}

pub async fn submit(ws: &Workspace, args: RequestArgs) -> anyhow::Result<()> {
    let declared: DeclaredType = args.declared_type.as_deref().unwrap_or("").parse()?;
    let registry = ws.registry();
    let outcome = pipeline(ws, &registry)?
        .submit(Request::new(args.description, declared))
        .await?;
    if let PipelineOutcome::AwaitingApproval { approval_id, .. } = &outcome {
        eprintln!("draft saved; run `featureloop approve --id {approval_id}` to create its features");
    }
    report(&outcome)
}

pub async fn approve(ws: &Workspace, args: ApprovalArgs) -> anyhow::Result<()> {
    let registry = ws.registry();
    let outcome = pipeline(ws, &registry)?.approve(args.id.as_deref()).await?;
    report(&outcome)
}

pub async fn reject(ws: &Workspace, args: ApprovalArgs) -> anyhow::Result<()> {
    let registry = ws.registry();
    let pipeline = Pipeline::new(ws.paths.clone(), HeuristicAuthor, &registry)
        .with_lock_timeout(ws.config.store.lock_timeout());
    report(&pipeline.reject(args.id.as_deref()).await?)
}

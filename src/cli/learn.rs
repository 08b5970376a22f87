//! Knowledge base and session log commands

use serde::Serialize;

use super::{LearnArgs, LearnKind, LearningsArgs, LogArgs, Workspace, print_json};
use crate::knowledge::{AddOutcome, KnowledgeBase, LearningKind};
use crate::session_log::SessionLog;

impl From<LearnKind> for LearningKind {
    fn from(kind: LearnKind) -> Self {
        match kind {
            LearnKind::Pattern => Self::Pattern,
            LearnKind::Gotcha => Self::Gotcha,
            LearnKind::Error => Self::CommonError,
        }
    }
}

#[derive(Serialize)]
struct Learned {
    kind: LearningKind,
    #[serde(flatten)]
    outcome: AddOutcome,
}

fn knowledge(ws: &Workspace) -> KnowledgeBase {
    KnowledgeBase::open(&ws.paths, ws.config.store.lock_timeout())
}

pub fn learn(ws: &Workspace, args: LearnArgs) -> anyhow::Result<()> {
    let kind = LearningKind::from(args.kind);
    let outcome = knowledge(ws).add(kind, &args.text, &args.rationale)?;
    print_json(&Learned { kind, outcome })
}

pub fn learnings(ws: &Workspace, args: LearningsArgs) -> anyhow::Result<()> {
    let kb = knowledge(ws);
    match args.kind {
        Some(kind) => print_json(&kb.list(kind.into())?),
        None => print_json(&kb.all()?),
    }
}

pub fn log(ws: &Workspace, args: LogArgs) -> anyhow::Result<()> {
    let log = SessionLog::open(&ws.paths, ws.config.store.lock_timeout());
    let Some(message) = args.message else {
        return print_json(&log.entries()?);
    };
    let session = match (args.session, args.new_session) {
        (Some(n), _) => n,
        (None, true) => log.next_session_number()?,
        (None, false) => log.current_session_number()?,
    };
    print_json(&log.append(session, &message)?)
}

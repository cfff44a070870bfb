//! Path to fid resolution, one walk transaction per component.

use log::{debug, warn};

use crate::{
    error::{Error, ServerError},
    fcall::QId,
    session::Session,
    utils::Result,
};

/// A fid together with the qid it was established with
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub fid: u32,
    pub qid: QId,
}

/// Where a walk starts and which names it takes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan<'p> {
    pub from_root: bool,
    pub names: Vec<&'p str>,
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Split `path` into walk names.
///
/// A leading separator starts from the root. `.` and empty components vanish. A `..`
/// that would climb above the root is not-found, decided here so it costs no
/// transaction. `start_is_root` says whether a relative path starts at the root.
pub fn plan(path: &str, start_is_root: bool) -> Result<Plan<'_>> {
    let from_root = path.starts_with(is_separator);
    let names: Vec<&str> = path
        .split(is_separator)
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();

    if from_root || start_is_root {
        let mut depth = 0usize;
        for name in &names {
            if *name == ".." {
                depth = depth
                    .checked_sub(1)
                    .ok_or(Error::Server(ServerError::NotFound))?;
            } else {
                depth += 1;
            }
        }
    }

    Ok(Plan { from_root, names })
}

/// Resolve `path` from `start` (or from `root` for absolute paths) into a new fid.
///
/// `start` counts as the root when it is the root fid or names the same object.
///
/// A `..` taken while standing on the root object is not-found, wherever it appears
/// in the path.
///
/// An empty plan still issues one zero-name walk, cloning the starting fid. Only the
/// final fid survives: every intermediate fid is clunked whether the walk succeeds
/// or fails part way.
pub async fn resolve(
    session: &Session,
    root: Location,
    start: Location,
    path: &str,
) -> Result<Location> {
    let at_root = start.fid == root.fid || start.qid.same_object(&root.qid);
    let plan = plan(path, at_root)?;
    let from = if plan.from_root { root } else { start };

    if plan.names.is_empty() {
        let newfid = session.fids().next_fid();
        session.walk(from.fid, newfid, &[]).await?;
        debug!("cloned fid {} as {}", from.fid, newfid);
        return Ok(Location {
            fid: newfid,
            qid: from.qid,
        });
    }

    let mut current = from;
    let mut owned: Option<u32> = None;
    for name in &plan.names {
        // The server answers `..` at its root with the root itself
        if *name == ".." && current.qid.same_object(&root.qid) {
            if let Some(previous) = owned {
                release(session, previous).await;
            }
            debug!("{:?} climbs above the root", path);
            return Err(Error::Server(ServerError::NotFound));
        }

        let newfid = session.fids().next_fid();
        let step = session.walk(current.fid, newfid, &[*name]).await;

        if let Some(previous) = owned {
            release(session, previous).await;
        }
        let wqids = step?;

        current = Location {
            fid: newfid,
            qid: wqids[0],
        };
        owned = Some(newfid);
    }

    debug!("{:?} resolved to fid {}", path, current.fid);
    Ok(current)
}

async fn release(session: &Session, fid: u32) {
    if let Err(e) = session.clunk(fid).await {
        warn!("clunk of intermediate fid {} failed: {}", fid, e);
    }
}

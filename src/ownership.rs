use crate::config::{ConfigError, RootConfig};
use crate::plan::Operation;
use crate::scan::ScanModel;
use anyhow::{Context as _, Result};
use nix::unistd::{Group, User};

/// The configured owner, resolved against the local account databases.
#[derive(Debug, Clone)]
pub struct ResolvedOwner {
    pub user: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
}

/// A name that does not resolve is a configuration error: better to refuse
/// the whole action than to chown a tree to the wrong account.
pub fn resolve_owner(cfg: &RootConfig) -> Result<ResolvedOwner> {
    let user_name = cfg.owner_user.as_deref().ok_or(ConfigError::OwnerNamesMissing)?;
    let group_name = cfg.owner_group.as_deref().ok_or(ConfigError::OwnerNamesMissing)?;
    let user = User::from_name(user_name)
        .with_context(|| format!("look up user {user_name:?}"))?
        .ok_or_else(|| ConfigError::UnknownUser(user_name.to_string()))?;
    let group = Group::from_name(group_name)
        .with_context(|| format!("look up group {group_name:?}"))?
        .ok_or_else(|| ConfigError::UnknownGroup(group_name.to_string()))?;
    Ok(ResolvedOwner {
        user: user_name.to_string(),
        group: group_name.to_string(),
        uid: user.uid.as_raw(),
        gid: group.gid.as_raw(),
    })
}

/// Flag every entry not owned by the resolved uid/gid.
pub fn analyze(model: &ScanModel, owner: &ResolvedOwner) -> Vec<Operation> {
    let mut ops = Vec::new();
    for dir in model.directories.values() {
        push_mismatch(&mut ops, dir.path.clone(), dir.stat.uid, dir.stat.gid, owner);
    }
    for file in model.files.values() {
        if file.ignored {
            continue;
        }
        push_mismatch(&mut ops, file.path.clone(), file.stat.uid, file.stat.gid, owner);
    }
    ops
}

fn push_mismatch(
    ops: &mut Vec<Operation>,
    path: std::path::PathBuf,
    uid: u32,
    gid: u32,
    owner: &ResolvedOwner,
) {
    if uid != owner.uid || gid != owner.gid {
        ops.push(Operation::Ownership {
            path,
            current_uid: uid,
            current_gid: gid,
            new_uid: owner.uid,
            new_gid: owner.gid,
            user: owner.user.clone(),
            group: owner.group.clone(),
        });
    }
}

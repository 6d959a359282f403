//! Directory/file metadata commands: `CWD`/`CDUP` (both resolved through
//! `Filesystem::list` so a bad `CWD` target gives the same verdict a `LIST`
//! of it would), `RNFR`/`RNTO`, `DELE`/`RMD`/`MKD`, `SIZE`/`MDTM`, and the
//! `STAT <path>` variant.

use super::vfs_error_reply;
use crate::error::ControlChanError;
use crate::reply::ReplyCode;
use crate::server::AppContext;
use crate::session::Session;

/// Joins `current` and `target` the way a Unix shell would: an absolute
/// `target` replaces `current` outright, a relative one is appended.
pub(crate) fn resolve(current: &str, target: &str) -> String {
    if target.starts_with('/') {
        target.to_string()
    } else if current == "/" {
        format!("/{target}")
    } else {
        format!("{current}/{target}")
    }
}

pub async fn cwd(session: &mut Session, ctx: &AppContext, path: &str) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let target = resolve(&session.current_dir, path);
    match ctx.fs.list(&target, &user).await {
        Ok(_) => {
            session.current_dir = target;
            session.push_reply(ReplyCode::FileActionOkay, "Directory successfully changed");
        }
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

pub async fn cdup(session: &mut Session, ctx: &AppContext) -> Result<(), ControlChanError> {
    let parent = match session.current_dir.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => session.current_dir[..idx].to_string(),
        None => "/".to_string(),
    };
    cwd(session, ctx, &parent).await
}

pub async fn rnfr(session: &mut Session, ctx: &AppContext, path: String) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let target = resolve(&session.current_dir, &path);
    match ctx.fs.stat(&target, &user).await {
        Ok(_) => {
            session.rename_from = Some(target);
            session.push_reply(ReplyCode::FileActionPending, "Ready for RNTO");
        }
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

pub async fn rnto(session: &mut Session, ctx: &AppContext, path: String) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let Some(old) = session.rename_from.take() else {
        session.push_reply(ReplyCode::BadCommandSequence, "RNFR required first");
        return Ok(());
    };
    let new = resolve(&session.current_dir, &path);
    match ctx.fs.rename(&old, &new, &user).await {
        Ok(()) => session.push_reply(ReplyCode::FileActionOkay, "Rename successful"),
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

pub async fn dele(session: &mut Session, ctx: &AppContext, path: &str) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let target = resolve(&session.current_dir, path);
    match ctx.fs.delete(&target, &user, false).await {
        Ok(()) => session.push_reply(ReplyCode::FileActionOkay, "File deleted"),
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

pub async fn rmd(session: &mut Session, ctx: &AppContext, path: &str) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let target = resolve(&session.current_dir, path);
    match ctx.fs.delete(&target, &user, true).await {
        Ok(()) => session.push_reply(ReplyCode::FileActionOkay, "Directory removed"),
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

pub async fn mkd(session: &mut Session, ctx: &AppContext, path: &str) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let target = resolve(&session.current_dir, path);
    match ctx.fs.mkd(&target, &user).await {
        Ok(()) => session.push_reply(ReplyCode::DirCreated, format!("\"{target}\" directory created")),
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

pub async fn size(session: &mut Session, ctx: &AppContext, path: &str) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let target = resolve(&session.current_dir, path);
    match ctx.fs.stat(&target, &user).await {
        Ok((len, _modified)) => session.push_reply(ReplyCode::FileStatus, len.to_string()),
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

pub async fn mdtm(session: &mut Session, ctx: &AppContext, path: &str) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let target = resolve(&session.current_dir, path);
    match ctx.fs.stat(&target, &user).await {
        Ok((_len, modified)) => session.push_reply(ReplyCode::FileStatus, modified.format("%Y%m%d%H%M%S").to_string()),
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

pub async fn stat_path(session: &mut Session, ctx: &AppContext, path: &str) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let target = resolve(&session.current_dir, path);
    match ctx.fs.list(&target, &user).await {
        Ok(entries) => {
            session.push_reply(ReplyCode::DirectoryStatus, format!("Status of {target}:"));
            for entry in &entries {
                session.push_reply(ReplyCode::DirectoryStatus, entry.name.clone());
            }
            session.push_reply(ReplyCode::DirectoryStatus, "End of status");
        }
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::resolve;

    #[test]
    fn absolute_target_replaces_current() {
        assert_eq!(resolve("/a/b", "/c"), "/c");
    }

    #[test]
    fn relative_target_is_appended() {
        assert_eq!(resolve("/a", "b"), "/a/b");
        assert_eq!(resolve("/", "b"), "/b");
    }
}

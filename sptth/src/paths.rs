use std::fs;
use std::io;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::{Mutex, MutexGuard, OnceLock};

const SPTTH_HOME_ENV: &str = "SPTTH_HOME";

/// Get sptth's state directory.
///
/// - `SPTTH_HOME` wins when set.
/// - Otherwise `~/.sptth` of the invoking user, which under `sudo` is the
///   user who ran `sudo`, not root.
pub fn sptth_home_dir() -> Result<PathBuf, io::Error> {
    if let Ok(v) = std::env::var(SPTTH_HOME_ENV)
        && !v.trim().is_empty()
    {
        return Ok(PathBuf::from(v));
    }

    Ok(invoking_user_home()?.join(".sptth"))
}

pub fn default_ca_dir() -> Result<PathBuf, io::Error> {
    Ok(sptth_home_dir()?.join("ca"))
}

pub fn default_cert_dir() -> Result<PathBuf, io::Error> {
    Ok(sptth_home_dir()?.join("certs"))
}

/// Home directory of the user who started the process.
///
/// When running under a privilege-escalation wrapper, `SUDO_UID` names the
/// original user and their passwd entry is used instead of `$HOME`.
pub fn invoking_user_home() -> Result<PathBuf, io::Error> {
    if let Some((uid, _)) = sudo_ids()
        && uid != 0
        && let Some(home) = home_for_uid(uid)
    {
        return Ok(home);
    }

    dirs::home_dir().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "Could not determine home directory")
    })
}

/// Expand a leading `~` against the invoking user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf, io::Error> {
    if path == "~" {
        return invoking_user_home();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return Ok(invoking_user_home()?.join(rest));
    }
    Ok(PathBuf::from(path))
}

fn sudo_ids() -> Option<(u32, u32)> {
    let uid = std::env::var("SUDO_UID").ok()?.trim().parse::<u32>().ok()?;
    let gid = std::env::var("SUDO_GID").ok()?.trim().parse::<u32>().ok()?;
    Some((uid, gid))
}

#[cfg(unix)]
fn home_for_uid(uid: u32) -> Option<PathBuf> {
    use std::ffi::CStr;
    use std::os::unix::ffi::OsStrExt;

    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0 as libc::c_char; 16 * 1024];

    let rc = unsafe {
        libc::getpwuid_r(
            uid as libc::uid_t,
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() || pwd.pw_dir.is_null() {
        return None;
    }

    let dir = unsafe { CStr::from_ptr(pwd.pw_dir) };
    let dir = std::ffi::OsStr::from_bytes(dir.to_bytes());
    if dir.is_empty() {
        return None;
    }
    Some(PathBuf::from(dir))
}

#[cfg(not(unix))]
fn home_for_uid(_uid: u32) -> Option<PathBuf> {
    None
}

/// Hand a path created by root back to the user who invoked `sudo`.
#[cfg(unix)]
fn chown_to_invoking_user(path: &Path) -> io::Result<()> {
    let Some((uid, gid)) = sudo_ids() else {
        return Ok(());
    };
    if uid == 0 {
        return Ok(());
    }
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

#[cfg(not(unix))]
fn chown_to_invoking_user(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Create `dir` (and parents) readable only by its owner.
pub fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }

    chown_to_invoking_user(dir)
}

/// Atomically replace `path` with `contents`, mode 0600.
///
/// The data is written to a sibling temp file first and renamed into place,
/// so readers see either the old file or the complete new one.
pub fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(format!(".tmp-{}", std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    let write_result = write_new_private(&tmp_path, contents)
        .and_then(|()| chown_to_invoking_user(&tmp_path))
        .and_then(|()| fs::rename(&tmp_path, path));
    if write_result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    write_result
}

fn write_new_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
pub(crate) fn test_env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

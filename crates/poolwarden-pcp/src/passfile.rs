//! `PCPPASSFILE` writer.
//!
//! The PCP tools run with `-w` (never prompt), so credentials come from a
//! file of `host:port:user:password` lines, in the same format as libpq's
//! `.pgpass`.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Write a single-entry password file, readable by the owner only.
pub fn write_passfile(
    path: &Path,
    host: &str,
    port: u16,
    user: &str,
    password: &str,
) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let line = format!(
        "{}:{}:{}:{}\n",
        escape(host),
        port,
        escape(user),
        escape(password)
    );

    // The secret only ever lands in a fresh owner-only file, which then
    // replaces `path`. A pre-existing file is never written in place.
    let tmp_path = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp_path)?;
    // `mode` only applies on creation; tighten a leftover temp file too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(line.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)
}

fn escape(field: &str) -> String {
    field.replace('\\', "\\\\").replace(':', "\\:")
}

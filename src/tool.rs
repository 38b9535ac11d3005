use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

pub const BGZIP_ENV: &str = "SEQREPO_BGZIP_PATH";
pub const MIN_BGZIP_VERSION: (u32, u32, u32) = (1, 2, 1);

const FALLBACK_BGZIP: &str = "/usr/bin/bgzip";

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Version:|bgzip \(htslib\))\s+(\d+)\.(\d+)(?:\.(\d+))?")
        .expect("static regex")
});

/// A located, version-checked `bgzip` executable.
#[derive(Debug, Clone)]
pub struct Bgzip {
    exe: PathBuf,
    version: String,
}

impl Bgzip {
    /// Locate bgzip (explicit path, then `PATH`, then /usr/bin) and check it
    /// meets `MIN_BGZIP_VERSION`.
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        let exe = match explicit {
            Some(p) => p.to_path_buf(),
            None => which::which("bgzip").unwrap_or_else(|_| PathBuf::from(FALLBACK_BGZIP)),
        };

        let output = Command::new(&exe).arg("-h").output().map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                "doesn't exist; install htslib".to_string()
            } else {
                format!("failed to execute: {e}")
            };
            Error::ToolUnavailable {
                tool: exe.display().to_string(),
                reason,
            }
        })?;

        // Help text goes to stdout or stderr depending on the htslib release.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let version = parse_version(&text).ok_or_else(|| Error::ToolUnavailable {
            tool: exe.display().to_string(),
            reason: "didn't find version string in help output".to_string(),
        })?;
        let version_s = format!("{}.{}.{}", version.0, version.1, version.2);

        if version < MIN_BGZIP_VERSION {
            let (a, b, c) = MIN_BGZIP_VERSION;
            return Err(Error::ToolVersionTooOld {
                tool: exe.display().to_string(),
                found: version_s,
                required: format!("{a}.{b}.{c}"),
            });
        }

        Ok(Self {
            exe,
            version: version_s,
        })
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `bgzip --force <plain>`; returns the `<plain>.gz` it leaves behind.
    pub fn compress(&self, plain: &Path) -> Result<PathBuf> {
        let status = Command::new(&self.exe)
            .arg("--force")
            .arg(plain)
            .status()
            .map_err(|e| Error::ToolUnavailable {
                tool: self.exe.display().to_string(),
                reason: format!("failed to execute: {e}"),
            })?;
        if !status.success() {
            return Err(Error::corrupt(
                plain,
                format!("{} exited with {status}", self.exe.display()),
            ));
        }

        let mut gz = plain.as_os_str().to_owned();
        gz.push(".gz");
        Ok(PathBuf::from(gz))
    }
}

/// Extract (major, minor, patch) from `bgzip -h` output.
pub fn parse_version(text: &str) -> Option<(u32, u32, u32)> {
    text.lines().find_map(|line| {
        let caps = VERSION_RE.captures(line)?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps.get(2)?.as_str().parse().ok()?;
        let patch = caps
            .get(3)
            .map_or(Some(0), |m| m.as_str().parse().ok())?;
        Some((major, minor, patch))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_version_styles() {
        let old = "\nVersion: 1.2.1\nUsage:   bgzip [options] [file] ...\n";
        assert_eq!(parse_version(old), Some((1, 2, 1)));

        let new = "bgzip (htslib) 1.13\nCopyright (C) 2021\n";
        assert_eq!(parse_version(new), Some((1, 13, 0)));

        assert_eq!(parse_version("Usage: bgzip [options]"), None);
    }

    #[test]
    fn version_ordering_matches_minimum() {
        assert!((1, 2, 0) < MIN_BGZIP_VERSION);
        assert!((1, 10, 0) > MIN_BGZIP_VERSION);
    }

    #[test]
    fn missing_executable_is_unavailable() {
        let err = Bgzip::locate(Some(Path::new("/nonexistent/dir/bgzip"))).unwrap_err();
        assert!(matches!(err, Error::ToolUnavailable { .. }), "{err}");
    }

    #[cfg(unix)]
    fn fake_bgzip(dir: &Path, body: &str) -> PathBuf {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("bgzip");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        f.sync_all().unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn old_bgzip_is_too_old() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_bgzip(dir.path(), "echo 'Version: 1.2.0'");
        match Bgzip::locate(Some(&exe)) {
            Err(Error::ToolVersionTooOld { found, required, .. }) => {
                assert_eq!(found, "1.2.0");
                assert_eq!(required, "1.2.1");
            }
            other => panic!("expected ToolVersionTooOld, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn silent_bgzip_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_bgzip(dir.path(), "exit 0");
        let err = Bgzip::locate(Some(&exe)).unwrap_err();
        assert!(matches!(err, Error::ToolUnavailable { .. }), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn help_on_stderr_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_bgzip(dir.path(), "echo 'bgzip (htslib) 1.10.2' >&2");
        let tool = Bgzip::locate(Some(&exe)).unwrap();
        assert_eq!(tool.exe(), exe.as_path());
        assert_eq!(tool.version(), "1.10.2");
    }
}

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::debug;
use walkdir::WalkDir;

/// Default cgroup v2 mount point.
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

const CGROUP_PROCS: &str = "cgroup.procs";

/// Resolves the set of pids that currently belong to the monitored group.
pub trait Discovery {
    /// Pids in the group right now. An unknown or unresolvable group yields
    /// an empty set, never an error.
    fn tracked_pids(&self) -> HashSet<u32>;
}

/// Discovery through a systemd unit's control group.
///
/// The unit's `ControlGroup` property is looked up on every call, so a
/// service restarted mid-session is followed to its new cgroup.
#[derive(Debug, Clone)]
pub struct ServiceCgroupDiscovery {
    service: String,
    cgroup_root: PathBuf,
    systemctl: PathBuf,
}

impl ServiceCgroupDiscovery {
    /// Create a discovery for `service` under `cgroup_root`.
    pub fn new(service: impl Into<String>, cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            service: service.into(),
            cgroup_root: cgroup_root.into(),
            systemctl: PathBuf::from("systemctl"),
        }
    }

    /// Use a different `systemctl` binary.
    pub fn with_systemctl(mut self, systemctl: impl Into<PathBuf>) -> Self {
        self.systemctl = systemctl.into();
        self
    }

    /// Ask systemd for the unit's control group path, e.g.
    /// `/system.slice/nginx.service`. `None` when the unit has none.
    fn control_group(&self) -> Result<Option<String>> {
        let output = Command::new(&self.systemctl)
            .args(["show", "--property", "ControlGroup", "--value"])
            .arg(&self.service)
            .output()
            .with_context(|| format!("running {}", self.systemctl.display()))?;

        if !output.status.success() {
            bail!(
                "{} show {} exited with {}",
                self.systemctl.display(),
                self.service,
                output.status
            );
        }

        Ok(control_group_from_output(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }
}

impl Discovery for ServiceCgroupDiscovery {
    fn tracked_pids(&self) -> HashSet<u32> {
        let cgroup = match self.control_group() {
            Ok(Some(cg)) => cg,
            Ok(None) => {
                debug!(service = %self.service, "service has no control group");
                return HashSet::new();
            }
            Err(e) => {
                debug!(service = %self.service, error = %e, "control group lookup failed");
                return HashSet::new();
            }
        };

        let dir = cgroup_dir(&self.cgroup_root, &cgroup);
        pids_or_empty(&dir)
    }
}

/// Discovery over a fixed cgroup directory, for hosts without systemd.
#[derive(Debug, Clone)]
pub struct CgroupPathDiscovery {
    path: PathBuf,
}

impl CgroupPathDiscovery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Discovery for CgroupPathDiscovery {
    fn tracked_pids(&self) -> HashSet<u32> {
        pids_or_empty(&self.path)
    }
}

fn pids_or_empty(dir: &Path) -> HashSet<u32> {
    match discover_by_cgroup_tree(dir) {
        Ok(pids) => {
            debug!(count = pids.len(), path = %dir.display(), "discovered pids");
            pids
        }
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "cgroup discovery failed");
            HashSet::new()
        }
    }
}

/// Extract the control group from `systemctl show --value` output. Empty
/// output and the root group `/` mean the unit is not running.
pub fn control_group_from_output(stdout: &str) -> Option<String> {
    let value = stdout.trim();
    if value.is_empty() || value == "/" {
        return None;
    }
    Some(value.to_string())
}

/// Map a control group path onto the cgroup mount.
pub fn cgroup_dir(cgroup_root: &Path, cgroup: &str) -> PathBuf {
    cgroup_root.join(cgroup.trim_start_matches('/'))
}

/// Collect pids from every `cgroup.procs` file at or below `dir`.
///
/// Subtrees or files that vanish or cannot be read during the walk are
/// skipped.
pub fn discover_by_cgroup_tree(dir: &Path) -> Result<HashSet<u32>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let mut pids = HashSet::with_capacity(16);

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping cgroup entry");
                continue;
            }
        };

        if !entry.file_type().is_file() || entry.file_name() != CGROUP_PROCS {
            continue;
        }

        let content = match std::fs::read_to_string(entry.path()) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "cgroup.procs unreadable");
                continue;
            }
        };

        pids.extend(parse_cgroup_procs(&content));
    }

    Ok(pids)
}

/// Parse the contents of a `cgroup.procs` file, one pid per line.
pub fn parse_cgroup_procs(content: &str) -> Vec<u32> {
    let mut pids = Vec::with_capacity(16);

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.parse::<u32>() {
            Ok(pid) => pids.push(pid),
            Err(_) => {
                debug!(line, "non-numeric line in cgroup.procs");
            }
        }
    }

    pids
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    #[test]
    fn test_control_group_from_output() {
        assert_eq!(
            control_group_from_output("/system.slice/nginx.service\n"),
            Some("/system.slice/nginx.service".to_string())
        );
        assert_eq!(control_group_from_output(""), None);
        assert_eq!(control_group_from_output("  \n"), None);
        assert_eq!(control_group_from_output("/\n"), None);
    }

    #[test]
    fn test_cgroup_dir_strips_leading_slash() {
        let dir = cgroup_dir(Path::new("/sys/fs/cgroup"), "/system.slice/a.service");
        assert_eq!(dir, PathBuf::from("/sys/fs/cgroup/system.slice/a.service"));
    }

    #[test]
    fn test_parse_cgroup_procs() {
        assert_eq!(parse_cgroup_procs("12\n 34 \n\nabc\n56\n"), vec![12, 34, 56]);
        assert!(parse_cgroup_procs("").is_empty());
    }

    #[test]
    fn test_discover_by_cgroup_tree_recurses() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("svc.service");
        let child = root.join("worker").join("inner");
        fs::create_dir_all(&child).expect("mkdir");
        fs::write(root.join(CGROUP_PROCS), "100\n101\n").expect("write");
        fs::write(child.join(CGROUP_PROCS), "200\n100\n").expect("write");
        fs::write(root.join("cgroup.threads"), "999\n").expect("write");

        let pids = discover_by_cgroup_tree(&root).expect("discover");
        assert_eq!(pids, HashSet::from([100, 101, 200]));
    }

    #[test]
    fn test_missing_cgroup_is_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let disc = CgroupPathDiscovery::new(tmp.path().join("absent"));
        assert!(disc.tracked_pids().is_empty());
    }

    #[test]
    fn test_missing_systemctl_is_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let disc = ServiceCgroupDiscovery::new("nope.service", tmp.path())
            .with_systemctl(tmp.path().join("no-such-systemctl"));
        assert!(disc.tracked_pids().is_empty());
    }
}

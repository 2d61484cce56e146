//! Binary association groups
//!
//! An association group is a cluster of cooperating binaries (a browser and
//! its plugin host, a media player and its CLI front-end) that the sandbox
//! treats as one trust unit. The first member of a group is its main binary
//! and doubles as the group key.
//!
//! Groups come from a built-in table and, optionally, from per-application
//! profile files. The registry is filled once per process and is read-only
//! afterwards.

use crate::error::{ExecGateError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Separator used when exporting a group as a single string
pub const LIST_SEPARATOR: &str = ":";

/// A named cluster of binaries trusted as one application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationGroup {
    name: String,
    members: Vec<PathBuf>,
}

impl AssociationGroup {
    /// Create a group from its main binary and its helpers.
    ///
    /// Duplicate helpers are dropped, keeping the first occurrence.
    pub fn new(
        name: impl Into<String>,
        main: impl Into<PathBuf>,
        helpers: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> Self {
        let mut members = vec![main.into()];
        for helper in helpers {
            let helper = helper.into();
            if !members.contains(&helper) {
                members.push(helper);
            }
        }
        Self {
            name: name.into(),
            members,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The main binary, which is also the group key.
    #[must_use]
    pub fn key(&self) -> &Path {
        &self.members[0]
    }

    /// All members in group order, main binary first.
    #[must_use]
    pub fn members(&self) -> &[PathBuf] {
        &self.members
    }
}

/// Association groups plus a reverse index from member path to group key
#[derive(Debug, Default)]
pub struct AssociationRegistry {
    groups: HashMap<PathBuf, AssociationGroup>,
    index: HashMap<PathBuf, PathBuf>,
}

impl AssociationRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in application groups.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for group in builtin_groups() {
            if let Err(e) = registry.insert_group(group) {
                warn!("Skipping built-in association group: {}", e);
            }
        }
        registry
    }

    /// Add a group.
    ///
    /// Fails without modifying the registry if any member already belongs to
    /// another group, or if a member is not an absolute path.
    pub fn insert_group(&mut self, group: AssociationGroup) -> Result<()> {
        for member in group.members() {
            if !member.is_absolute() {
                return Err(ExecGateError::ProfileParse {
                    path: group.key().to_path_buf(),
                    reason: format!("member {} is not an absolute path", member.display()),
                });
            }
            if let Some(existing) = self.index.get(member) {
                return Err(ExecGateError::AssociationConflict {
                    member: member.clone(),
                    group: existing.clone(),
                });
            }
        }

        let key = group.key().to_path_buf();
        for member in group.members() {
            self.index.insert(member.clone(), key.clone());
        }
        debug!(
            "Registered association group '{}' ({} members)",
            group.name(),
            group.members().len()
        );
        self.groups.insert(key, group);
        Ok(())
    }

    /// Key of the group `path` belongs to.
    #[must_use]
    pub fn group_key_for(&self, path: &Path) -> Option<&Path> {
        self.index.get(path).map(PathBuf::as_path)
    }

    /// Members of the group keyed by `group_key`, empty if there is none.
    #[must_use]
    pub fn members_of(&self, group_key: &Path) -> &[PathBuf] {
        self.groups
            .get(group_key)
            .map(AssociationGroup::members)
            .unwrap_or_default()
    }

    /// Look up a whole group by key.
    #[must_use]
    pub fn group(&self, group_key: &Path) -> Option<&AssociationGroup> {
        self.groups.get(group_key)
    }

    /// True iff `callee` belongs to the same group as `caller`.
    ///
    /// A caller without a group has no associates.
    #[must_use]
    pub fn is_associated(&self, caller: &Path, callee: &Path) -> bool {
        let associated = match self.group_key_for(caller) {
            Some(key) => self.members_of(key).iter().any(|m| m == callee),
            None => false,
        };
        trace!(
            "{} is {}associated with {}",
            callee.display(),
            if associated { "" } else { "not " },
            caller.display()
        );
        associated
    }

    /// Every member of `path`'s group, colon-separated in group order.
    ///
    /// Empty when `path` has no group.
    #[must_use]
    pub fn list_siblings_string(&self, path: &Path) -> String {
        match self.group_key_for(path) {
            Some(key) => self
                .members_of(key)
                .iter()
                .map(|m| m.to_string_lossy())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
            None => String::new(),
        }
    }

    /// Number of groups
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Load every `*.toml` association profile found in `dir`.
    ///
    /// Loading is best-effort: unreadable, malformed or conflicting profiles
    /// are logged and skipped. Files are visited in name order so conflicts
    /// resolve the same way on every run. Returns the number of groups added.
    pub fn load_profiles_dir(&mut self, dir: &Path) -> usize {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Cannot read association profiles at {}: {}",
                    dir.display(),
                    e
                );
                return 0;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match load_profile(&path).and_then(|group| self.insert_group(group)) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Ignoring association profile {}: {}", path.display(), e),
            }
        }
        info!(
            "Loaded {} association profile(s) from {}",
            loaded,
            dir.display()
        );
        loaded
    }
}

/// On-disk association profile: one application, one group
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AssociationProfile {
    meta: ProfileMeta,
    binaries: ProfileBinaries,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileMeta {
    name: String,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileBinaries {
    main: PathBuf,
    #[serde(default)]
    helpers: Vec<PathBuf>,
}

/// Parse one association profile file.
///
/// ```toml
/// [meta]
/// name = "vlc"
///
/// [binaries]
/// main = "/usr/bin/vlc"
/// helpers = ["/usr/bin/cvlc", "/usr/bin/vlc-wrapper"]
/// ```
pub fn load_profile(path: &Path) -> Result<AssociationGroup> {
    let content = std::fs::read_to_string(path).map_err(|e| ExecGateError::ProfileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_profile(&content, path)
}

fn parse_profile(content: &str, path: &Path) -> Result<AssociationGroup> {
    let profile: AssociationProfile =
        toml::from_str(content).map_err(|e| ExecGateError::ProfileParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if profile.meta.name.trim().is_empty() {
        return Err(ExecGateError::ProfileParse {
            path: path.to_path_buf(),
            reason: "meta.name must not be empty".to_string(),
        });
    }

    Ok(AssociationGroup::new(
        profile.meta.name,
        profile.binaries.main,
        profile.binaries.helpers,
    ))
}

fn builtin_groups() -> Vec<AssociationGroup> {
    vec![
        AssociationGroup::new(
            "firefox",
            "/usr/bin/firefox",
            [
                "/usr/lib/firefox/webapprt-stub",
                "/usr/lib/firefox/plugin-container",
                "/usr/lib/firefox/firefox",
            ],
        ),
        AssociationGroup::new(
            "vlc",
            "/usr/bin/vlc",
            [
                "/usr/lib/vlc/vlc-cache-gen",
                "/usr/bin/vlc-wrapper",
                "/usr/bin/cvlc",
            ],
        ),
        AssociationGroup::new(
            "thunar",
            "/usr/bin/thunar",
            [
                "/usr/bin/thunar-volman-settings",
                "/usr/bin/thunar-volman",
                "/usr/bin/thunar-settings",
            ],
        ),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_vlc_group() {
        let registry = AssociationRegistry::builtin();
        assert_eq!(registry.len(), 3);

        assert!(registry.is_associated(Path::new("/usr/bin/cvlc"), Path::new("/usr/bin/vlc")));
        assert!(registry.is_associated(Path::new("/usr/bin/vlc"), Path::new("/usr/bin/cvlc")));
        assert!(!registry.is_associated(Path::new("/usr/bin/vlc"), Path::new("/usr/bin/thunar")));
    }

    #[test]
    fn test_unknown_caller_has_no_associates() {
        let registry = AssociationRegistry::builtin();
        assert!(!registry.is_associated(Path::new("/usr/bin/totem"), Path::new("/usr/bin/totem")));
        assert!(registry.group_key_for(Path::new("/usr/bin/totem")).is_none());
    }

    #[test]
    fn test_group_key_and_members() {
        let registry = AssociationRegistry::builtin();
        let key = registry
            .group_key_for(Path::new("/usr/lib/firefox/plugin-container"))
            .unwrap();
        assert_eq!(key, Path::new("/usr/bin/firefox"));

        let members = registry.members_of(key);
        assert_eq!(members.len(), 4);
        assert_eq!(members[0], PathBuf::from("/usr/bin/firefox"));
        assert!(registry.members_of(Path::new("/usr/bin/nothing")).is_empty());
        assert_eq!(registry.group(key).unwrap().name(), "firefox");
    }

    #[test]
    fn test_list_siblings_string() {
        let registry = AssociationRegistry::builtin();
        assert_eq!(
            registry.list_siblings_string(Path::new("/usr/bin/thunar-volman")),
            "/usr/bin/thunar:/usr/bin/thunar-volman-settings:/usr/bin/thunar-volman:/usr/bin/thunar-settings"
        );
        assert_eq!(registry.list_siblings_string(Path::new("/bin/ls")), "");
    }

    #[test]
    fn test_member_in_two_groups_rejected() {
        let mut registry = AssociationRegistry::new();
        registry
            .insert_group(AssociationGroup::new(
                "player",
                "/opt/player/bin/player",
                ["/opt/shared/codec-helper"],
            ))
            .unwrap();

        let err = registry
            .insert_group(AssociationGroup::new(
                "editor",
                "/opt/editor/bin/editor",
                ["/opt/shared/codec-helper"],
            ))
            .unwrap_err();
        assert!(matches!(err, ExecGateError::AssociationConflict { .. }));

        // the failed insert left no trace
        assert_eq!(registry.len(), 1);
        assert!(registry
            .group_key_for(Path::new("/opt/editor/bin/editor"))
            .is_none());
    }

    #[test]
    fn test_relative_member_rejected() {
        let mut registry = AssociationRegistry::new();
        let err = registry
            .insert_group(AssociationGroup::new("bad", "/usr/bin/app", ["helper"]))
            .unwrap_err();
        assert!(matches!(err, ExecGateError::ProfileParse { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_helpers_collapsed() {
        let group = AssociationGroup::new(
            "dup",
            "/usr/bin/app",
            ["/usr/bin/app", "/usr/bin/app-helper", "/usr/bin/app-helper"],
        );
        assert_eq!(
            group.members(),
            &[
                PathBuf::from("/usr/bin/app"),
                PathBuf::from("/usr/bin/app-helper")
            ]
        );
    }

    #[test]
    fn test_load_profiles_dir() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("evince.toml"),
            r#"
[meta]
name = "evince"
description = "Document viewer"

[binaries]
main = "/usr/bin/evince"
helpers = ["/usr/bin/evince-previewer", "/usr/bin/evince-thumbnailer"]
"#,
        )
        .unwrap();
        fs::write(dir.path().join("broken.toml"), "[meta\nname=").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a profile").unwrap();
        // conflicts with the built-in vlc group
        fs::write(
            dir.path().join("vlc-fork.toml"),
            "[meta]\nname = \"vlc-fork\"\n[binaries]\nmain = \"/opt/vlc-fork\"\nhelpers = [\"/usr/bin/cvlc\"]\n",
        )
        .unwrap();

        let mut registry = AssociationRegistry::builtin();
        assert_eq!(registry.load_profiles_dir(dir.path()), 1);
        assert_eq!(registry.len(), 4);
        assert!(registry.is_associated(
            Path::new("/usr/bin/evince-thumbnailer"),
            Path::new("/usr/bin/evince")
        ));
        assert_eq!(
            registry.group_key_for(Path::new("/usr/bin/cvlc")),
            Some(Path::new("/usr/bin/vlc"))
        );
    }

    #[test]
    fn test_load_profiles_missing_dir() {
        let dir = tempdir().unwrap();
        let mut registry = AssociationRegistry::new();
        assert_eq!(registry.load_profiles_dir(&dir.path().join("absent")), 0);
    }

    #[test]
    fn test_profile_rejects_unknown_fields_and_empty_name() {
        let path = Path::new("/etc/execgate/profiles/x.toml");
        assert!(parse_profile(
            "[meta]\nname = \"x\"\n[binaries]\nmain = \"/x\"\nextra = 1\n",
            path
        )
        .is_err());
        assert!(parse_profile("[meta]\nname = \" \"\n[binaries]\nmain = \"/x\"\n", path).is_err());
    }
}

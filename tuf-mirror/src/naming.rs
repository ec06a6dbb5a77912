//! Canonical file names for TUF metadata and target files.
//!
//! The same name is used as the identity annotation on OCI layers and index entries and as the
//! on-disk file name, so a consumer can lay mirrored content back out as a TUF repository.

use crate::error::{self, Result};
use crate::provider::{Role, RoleDocument, TargetDescriptor};
use snafu::{ensure, OptionExt};
use std::num::NonZeroU64;

/// Suffix that marks a delegation path pattern as covering a whole directory.
const DIRECTORY_PATTERN_SUFFIX: &str = "/*";

/// Name of one root version.  Every version in a chain keeps its own number.
pub fn root_name(version: NonZeroU64) -> String {
    format!("{}.{}.json", version, Role::Root)
}

/// Name of a top-level role document.  Snapshot and targets are version-prefixed only under
/// consistent snapshots; timestamp never is.
pub fn metadata_name(role: Role, version: NonZeroU64, consistent_snapshot: bool) -> Result<String> {
    match role {
        Role::Root => Ok(root_name(version)),
        Role::Snapshot | Role::Targets if consistent_snapshot => {
            Ok(format!("{}.{}.json", version, role))
        }
        Role::Snapshot | Role::Targets | Role::Timestamp => Ok(format!("{}.json", role)),
        Role::DelegatedTargets => error::UnsupportedRoleSnafu { role }.fail(),
    }
}

/// Convenience for naming a [`RoleDocument`].
pub fn document_name(document: &RoleDocument, consistent_snapshot: bool) -> Result<String> {
    metadata_name(document.role, document.version, consistent_snapshot)
}

/// Reverses [`metadata_name`], returning the role and, for version-prefixed names, the version.
pub fn parse_metadata_name(name: &str) -> Result<(Role, Option<NonZeroU64>)> {
    let unrecognized = || error::UnrecognizedNameSnafu { name };
    let stem = name.strip_suffix(".json").context(unrecognized())?;

    let (version, role) = match stem.split_once('.') {
        Some((version, role)) => {
            let version = version
                .parse::<NonZeroU64>()
                .ok()
                .context(unrecognized())?;
            (Some(version), role)
        }
        None => (None, stem),
    };
    let role = role.parse::<Role>().ok().context(unrecognized())?;

    match (role, version) {
        (Role::Root, Some(_))
        | (Role::Snapshot | Role::Targets, _)
        | (Role::Timestamp, None) => Ok((role, version)),
        _ => unrecognized().fail(),
    }
}

/// The lowercase hex sha256 listed for a target.  Other algorithms are never substituted.
fn sha256_hex(role: &str, target: &TargetDescriptor) -> Result<String> {
    let digest = target
        .hashes
        .get("sha256")
        .filter(|digest| !digest.is_empty())
        .context(error::MissingHashSnafu {
            role,
            path: &target.path,
        })?;
    Ok(hex::encode(digest))
}

/// `<sha256>.<path>` for a target listed by the top-level targets role.
pub fn target_name(target: &TargetDescriptor) -> Result<String> {
    let hash = sha256_hex(&Role::Targets.to_string(), target)?;
    Ok(format!("{}.{}", hash, target.path))
}

/// The directory a delegated role's targets are mirrored under, cut from its first path pattern.
/// `images/*` yields `images`.
pub fn delegation_subdir(role: &str, patterns: &[String]) -> Result<String> {
    let pattern = patterns
        .first()
        .context(error::NoDelegationPathsSnafu { role })?;
    let subdir = pattern
        .strip_suffix(DIRECTORY_PATTERN_SUFFIX)
        .filter(|dir| !dir.is_empty() && !dir.starts_with('/') && !dir.ends_with('/'))
        .filter(|dir| !dir.contains(['*', '?', '[']))
        .context(error::UnparseableDelegationPathSnafu {
            role,
            path: pattern.as_str(),
        })?;
    Ok(subdir.to_string())
}

/// Names for a delegated target: the layer name `<sha256>.<relative path>` and the index entry
/// name `<subdir>/<layer name>`, where the relative path is taken below `subdir`.
pub fn delegated_target_name(
    role: &str,
    subdir: &str,
    target: &TargetDescriptor,
) -> Result<(String, String)> {
    let relative = target
        .path
        .strip_prefix(subdir)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty());
    let relative = relative.context(error::TargetOutsideDelegationSnafu {
        role,
        subdir,
        path: &target.path,
    })?;
    ensure!(
        !relative.split('/').any(|segment| segment == ".."),
        error::TargetOutsideDelegationSnafu {
            role,
            subdir,
            path: &target.path,
        }
    );

    let hash = sha256_hex(role, target)?;
    let layer_name = format!("{}.{}", hash, relative);
    let entry_name = format!("{}/{}", subdir, layer_name);
    Ok((layer_name, entry_name))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use std::collections::BTreeMap;

    fn v(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    fn target(path: &str, hash: Option<&[u8]>) -> TargetDescriptor {
        let mut hashes = BTreeMap::new();
        if let Some(hash) = hash {
            hashes.insert("sha256".to_string(), hash.to_vec());
        }
        TargetDescriptor {
            path: path.to_string(),
            length: 5,
            hashes,
        }
    }

    #[test]
    fn consistent_snapshot_names() {
        assert_eq!(metadata_name(Role::Root, v(3), true).unwrap(), "3.root.json");
        assert_eq!(metadata_name(Role::Root, v(3), false).unwrap(), "3.root.json");
        assert_eq!(
            metadata_name(Role::Snapshot, v(7), true).unwrap(),
            "7.snapshot.json"
        );
        assert_eq!(metadata_name(Role::Targets, v(7), false).unwrap(), "targets.json");
        assert_eq!(
            metadata_name(Role::Timestamp, v(9), true).unwrap(),
            "timestamp.json"
        );
        assert!(matches!(
            metadata_name(Role::DelegatedTargets, v(1), true),
            Err(Error::UnsupportedRole { .. })
        ));
    }

    #[test]
    fn parse_reverses_metadata_name() {
        for role in Role::TOP_LEVEL {
            for consistent in [true, false] {
                let name = metadata_name(role, v(4), consistent).unwrap();
                let (parsed, version) = parse_metadata_name(&name).unwrap();
                assert_eq!(parsed, role);
                let expect_version = role == Role::Root
                    || (consistent && matches!(role, Role::Snapshot | Role::Targets));
                assert_eq!(version, expect_version.then(|| v(4)), "{}", name);
            }
        }
    }

    #[test]
    fn parse_rejects_foreign_names() {
        for name in [
            "root.json",
            "2.timestamp.json",
            "0.root.json",
            "x.snapshot.json",
            "1.mirror.json",
            "targets.txt",
            "3.delegated-targets.json",
        ] {
            assert!(
                matches!(parse_metadata_name(name), Err(Error::UnrecognizedName { .. })),
                "{}",
                name
            );
        }
    }

    #[test]
    fn target_names_are_hash_prefixed() {
        let t = target("a/b.txt", Some(&[0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(target_name(&t).unwrap(), "deadbeef.a/b.txt");
    }

    #[test]
    fn missing_sha256_is_an_error() {
        let mut t = target("a.txt", None);
        t.hashes.insert("sha512".to_string(), vec![1, 2, 3]);
        assert!(matches!(
            target_name(&t),
            Err(Error::MissingHash { path, .. }) if path == "a.txt"
        ));
    }

    #[test]
    fn subdir_from_first_pattern() {
        let patterns = vec!["images/*".to_string(), "other/*".to_string()];
        assert_eq!(delegation_subdir("img", &patterns).unwrap(), "images");
        assert_eq!(
            delegation_subdir("deep", &["a/b/*".to_string()]).unwrap(),
            "a/b"
        );
    }

    #[test]
    fn subdir_rejects_non_directory_patterns() {
        for pattern in ["images", "*", "/*", "images/*.png", "im*/*", "images//*"] {
            assert!(
                matches!(
                    delegation_subdir("img", &[pattern.to_string()]),
                    Err(Error::UnparseableDelegationPath { .. })
                ),
                "{}",
                pattern
            );
        }
        assert!(matches!(
            delegation_subdir("img", &[]),
            Err(Error::NoDelegationPaths { .. })
        ));
    }

    #[test]
    fn delegated_names_keep_directory() {
        let t = target("images/logo.png", Some(&[0xab, 0xc1]));
        let (layer, entry) = delegated_target_name("img", "images", &t).unwrap();
        assert_eq!(layer, "abc1.logo.png");
        assert_eq!(entry, "images/abc1.logo.png");

        let t = target("images/icons/x.svg", Some(&[0x01]));
        let (layer, entry) = delegated_target_name("img", "images", &t).unwrap();
        assert_eq!(layer, "01.icons/x.svg");
        assert_eq!(entry, "images/01.icons/x.svg");
    }

    #[test]
    fn delegated_target_outside_subdir() {
        for path in ["other/logo.png", "imageslogo.png", "images/", "images/../x"] {
            let t = target(path, Some(&[0x01]));
            assert!(
                matches!(
                    delegated_target_name("img", "images", &t),
                    Err(Error::TargetOutsideDelegation { .. })
                ),
                "{}",
                path
            );
        }
    }
}

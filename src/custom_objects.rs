//! Custom Objects Loader: scans a directory of operator-supplied manifests
//! at startup and tracks which RBAC objects the reconciler must never prune
//! (the "protected set").

use crate::errors::{Error, Result};
use kube::core::{DynamicObject, TypeMeta};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

const RECOGNIZED_KINDS: &[&str] = &[
    "Role",
    "RoleBinding",
    "ClusterRole",
    "ClusterRoleBinding",
    "ServiceAccount",
];

/// Names of the objects loaded from the custom role directory, grouped by
/// kind. Reconcile never deletes anything whose (kind, namespace, name)
/// shows up here.
#[derive(Debug, Clone, Default)]
pub struct ProtectedSet {
    pub roles: HashSet<(String, String)>,
    pub role_bindings: HashSet<(String, String)>,
    pub cluster_roles: HashSet<String>,
    pub cluster_role_bindings: HashSet<String>,
    pub service_accounts: HashSet<(String, String)>,
}

impl ProtectedSet {
    pub fn contains_role_binding(&self, namespace: &str, name: &str) -> bool {
        self.role_bindings
            .contains(&(namespace.to_string(), name.to_string()))
    }
}

/// A parsed custom manifest, ready to be applied to the cluster.
pub struct CustomObject {
    pub type_meta: TypeMeta,
    pub namespace: Option<String>,
    pub name: String,
    pub raw: DynamicObject,
}

/// Scans `dir` for `*.yml`/`*.yaml` files and parses every `---`-separated
/// document inside each. A missing directory is not an error (the hook is
/// simply disabled); a malformed document or an unrecognized kind is logged
/// and skipped rather than failing the whole load.
pub async fn load_custom_objects(dir: &Path) -> Result<(Vec<CustomObject>, ProtectedSet)> {
    let mut objects = Vec::new();
    let mut protected = ProtectedSet::default();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "custom role directory not present, skipping");
            return Ok((objects, protected));
        }
        Err(e) => {
            return Err(Error::Internal(format!(
                "reading custom role directory {}: {e}",
                dir.display()
            )))
        }
    };

    let mut paths = Vec::new();
    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("listing {}: {e}", dir.display())))?;
        let Some(entry) = entry else { break };
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"))
            .unwrap_or(false);
        if is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read custom role manifest, skipping");
                continue;
            }
        };

        for document in serde_yaml::Deserializer::from_str(&contents) {
            let parsed = match DynamicObject::deserialize(document) {
                Ok(obj) => obj,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse document, skipping");
                    continue;
                }
            };

            let Some(type_meta) = parsed.types.clone() else {
                warn!(path = %path.display(), "document has no apiVersion/kind, skipping");
                continue;
            };
            if !RECOGNIZED_KINDS.contains(&type_meta.kind.as_str()) {
                warn!(
                    path = %path.display(),
                    kind = type_meta.kind,
                    "unrecognized kind in custom role manifest, skipping"
                );
                continue;
            }

            let name = parsed.metadata.name.clone().unwrap_or_default();
            if name.is_empty() {
                warn!(path = %path.display(), kind = type_meta.kind, "document has no metadata.name, skipping");
                continue;
            }
            let namespace = parsed.metadata.namespace.clone();

            match type_meta.kind.as_str() {
                "Role" => {
                    protected
                        .roles
                        .insert((namespace.clone().unwrap_or_default(), name.clone()));
                }
                "RoleBinding" => {
                    protected
                        .role_bindings
                        .insert((namespace.clone().unwrap_or_default(), name.clone()));
                }
                "ClusterRole" => {
                    protected.cluster_roles.insert(name.clone());
                }
                "ClusterRoleBinding" => {
                    protected.cluster_role_bindings.insert(name.clone());
                }
                "ServiceAccount" => {
                    protected
                        .service_accounts
                        .insert((namespace.clone().unwrap_or_default(), name.clone()));
                }
                _ => unreachable!("filtered by RECOGNIZED_KINDS above"),
            }

            debug!(path = %path.display(), kind = type_meta.kind, name, "loaded custom object");
            objects.push(CustomObject {
                type_meta,
                namespace,
                name,
                raw: parsed,
            });
        }
    }

    Ok((objects, protected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn missing_directory_yields_empty_set() {
        let (objects, protected) = load_custom_objects(Path::new("/no/such/dir")).await.unwrap();
        assert!(objects.is_empty());
        assert_eq!(protected.role_bindings.len(), 0);
    }

    #[tokio::test]
    async fn loads_recognized_multi_document_manifest_and_skips_the_rest() {
        let dir = tempdir();
        let path = dir.path().join("roles.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"---
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: custom-admin
  namespace: team-x
roleRef:
  kind: ClusterRole
  name: admin
  apiGroup: rbac.authorization.k8s.io
subjects: []
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: ignored-configmap
---
this is not valid yaml: [
"#
        )
        .unwrap();

        let (objects, protected) = load_custom_objects(dir.path()).await.unwrap();
        assert_eq!(objects.len(), 1);
        assert!(protected.contains_role_binding("team-x", "custom-admin"));
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().expect("create temp dir")
    }
}

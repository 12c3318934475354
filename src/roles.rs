//! Role Resolver: maps a GitLab access level to the name of a pre-existing
//! `ClusterRole`, honoring operator overrides from configuration.

use crate::cli::Config;
use serde::{Deserialize, Serialize};

/// The scope a role binding applies to: the GitLab entity the namespace was
/// created for is either a project or a group (a user's personal namespace
/// is treated as a group scope, per `GetGroupRoleName` in the upstream
/// implementation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Project,
    Group,
}

/// GitLab's access levels, normalized to the four buckets the cluster side
/// cares about. `Owner` and `Maintainer` both map to `Master` because both
/// have full administrative rights on the corresponding cluster namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessLevel {
    Master,
    Reporter,
    Developer,
    Default,
}

impl AccessLevel {
    /// Mirrors `TranslateIntAccessLevels`: GitLab's numeric access levels
    /// (10 Guest, 20 Reporter, 30 Developer, 40 Maintainer, 50 Owner).
    pub fn from_numeric(level: i64) -> Self {
        match level {
            20 => AccessLevel::Reporter,
            30 => AccessLevel::Developer,
            40 | 50 => AccessLevel::Master,
            _ => AccessLevel::Default,
        }
    }

    /// Parses the string form used in webhook payloads (`project_access`,
    /// `group_access`): `Master`, `Reporter`, `Developer`, anything else is
    /// `Default` (the GitLab guest level has no dedicated string form).
    pub fn from_str_form(level: &str) -> Self {
        match level {
            "Master" | "Owner" => AccessLevel::Master,
            "Reporter" => AccessLevel::Reporter,
            "Developer" => AccessLevel::Developer,
            _ => AccessLevel::Default,
        }
    }
}

/// Resolves an [`AccessLevel`] within a [`Scope`] to the `ClusterRole` name
/// that should be bound, consulting operator overrides first and falling
/// back to the `gitlab-<scope>-<level>` convention.
pub fn role_name(config: &Config, scope: Scope, level: AccessLevel) -> String {
    match (scope, level) {
        (Scope::Project, AccessLevel::Master) => config
            .project_master_rolename
            .clone()
            .unwrap_or_else(|| "gitlab-project-master".to_string()),
        (Scope::Project, AccessLevel::Reporter) => config
            .project_reporter_rolename
            .clone()
            .unwrap_or_else(|| "gitlab-project-reporter".to_string()),
        (Scope::Project, AccessLevel::Developer) => config
            .project_developer_rolename
            .clone()
            .unwrap_or_else(|| "gitlab-project-developer".to_string()),
        (Scope::Project, AccessLevel::Default) => config
            .project_default_rolename
            .clone()
            .unwrap_or_else(|| "gitlab-project-guest".to_string()),
        (Scope::Group, AccessLevel::Master) => config
            .group_master_rolename
            .clone()
            .unwrap_or_else(|| "gitlab-group-master".to_string()),
        (Scope::Group, AccessLevel::Reporter) => config
            .group_reporter_rolename
            .clone()
            .unwrap_or_else(|| "gitlab-group-reporter".to_string()),
        (Scope::Group, AccessLevel::Developer) => config
            .group_developer_rolename
            .clone()
            .unwrap_or_else(|| "gitlab-group-developer".to_string()),
        (Scope::Group, AccessLevel::Default) => config
            .group_default_rolename
            .clone()
            .unwrap_or_else(|| "gitlab-group-guest".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn default_config() -> Config {
        Config::for_tests()
    }

    #[rstest]
    #[case(20, AccessLevel::Reporter)]
    #[case(30, AccessLevel::Developer)]
    #[case(40, AccessLevel::Master)]
    #[case(50, AccessLevel::Master)]
    #[case(10, AccessLevel::Default)]
    #[case(999, AccessLevel::Default)]
    fn numeric_translation_matches_gitlab_access_levels(
        #[case] numeric: i64,
        #[case] expected: AccessLevel,
    ) {
        assert_eq!(AccessLevel::from_numeric(numeric), expected);
    }

    #[test]
    fn project_master_default_role_name() {
        let config = default_config();
        assert_eq!(
            role_name(&config, Scope::Project, AccessLevel::Master),
            "gitlab-project-master"
        );
    }

    #[test]
    fn group_master_default_role_name_from_owner_numeric_level() {
        let config = default_config();
        let level = AccessLevel::from_numeric(50);
        assert_eq!(
            role_name(&config, Scope::Group, level),
            "gitlab-group-master"
        );
    }

    #[test]
    fn operator_override_takes_precedence_over_default() {
        let mut config = default_config();
        config.project_master_rolename = Some("custom-master".to_string());
        assert_eq!(
            role_name(&config, Scope::Project, AccessLevel::Master),
            "custom-master"
        );
    }
}

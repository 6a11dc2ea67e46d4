//! Document versions and promotion.
//!
//! A document has one `latest` version, at most one version per environment,
//! and any number of revisions. Promotion copies a version to another type:
//! the occupant of the target type is retyped to a revision or deleted, and a
//! new version with the source's content id takes its place.
//!
//! Every check runs in [`plan_promotion`] before the caller writes anything.

use crate::collection::CollectionConfig;
use crate::{error::Result, CollectionKey, DocumentId, Error, VersionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const LATEST: &str = "latest";
const REVISION: &str = "revision";

/// Type of a document version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionType {
    Latest,
    Revision,
    Environment(String),
}

impl VersionType {
    pub fn as_str(&self) -> &str {
        match self {
            VersionType::Latest => LATEST,
            VersionType::Revision => REVISION,
            VersionType::Environment(key) => key,
        }
    }

    pub fn is_environment(&self) -> bool {
        matches!(self, VersionType::Environment(_))
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            LATEST => Ok(VersionType::Latest),
            REVISION => Ok(VersionType::Revision),
            other => {
                crate::collection::validate_key(other)
                    .map_err(|_| Error::InvalidEnvironment(other.to_string()))?;
                Ok(VersionType::Environment(other.to_string()))
            }
        }
    }
}

impl TryFrom<String> for VersionType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<VersionType> for String {
    fn from(version_type: VersionType) -> Self {
        version_type.as_str().to_string()
    }
}

/// A stored version of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVersion {
    pub id: VersionId,
    pub document_id: DocumentId,
    pub version_type: VersionType,
    /// Shared by versions holding the same content
    pub content_id: String,
    #[serde(default)]
    pub promoted_from: Option<VersionId>,
}

/// A request to promote a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRequest {
    pub collection_key: CollectionKey,
    pub document_id: DocumentId,
    pub from_version_id: VersionId,
    pub to_version_type: VersionType,
    /// Allow a revision as the source
    #[serde(default)]
    pub allow_revision_source: bool,
}

/// What happens to the version currently holding the target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplacedAction {
    /// Becomes a revision pointing at the version that displaced it
    Retype,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplacedVersion {
    pub version: DocumentVersion,
    pub action: DisplacedAction,
}

/// The version a promotion creates. Its id is assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVersion {
    pub document_id: DocumentId,
    pub version_type: VersionType,
    pub content_id: String,
    pub promoted_from: VersionId,
}

impl NewVersion {
    pub fn with_id(&self, id: VersionId) -> DocumentVersion {
        DocumentVersion {
            id,
            document_id: self.document_id,
            version_type: self.version_type.clone(),
            content_id: self.content_id.clone(),
            promoted_from: Some(self.promoted_from),
        }
    }
}

/// A validated promotion, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionPlan {
    pub source: DocumentVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displaced: Option<DisplacedVersion>,
    pub new_version: NewVersion,
}

impl PromotionPlan {
    /// Execute the plan against an in-memory version list; `new_id` is the id
    /// the new version receives. Rows are not touched.
    pub fn apply(&self, versions: &mut Vec<DocumentVersion>, new_id: VersionId) -> DocumentVersion {
        if let Some(displaced) = &self.displaced {
            match displaced.action {
                DisplacedAction::Retype => {
                    if let Some(v) = versions.iter_mut().find(|v| v.id == displaced.version.id) {
                        v.version_type = VersionType::Revision;
                        v.promoted_from = Some(new_id);
                    }
                }
                DisplacedAction::Delete => versions.retain(|v| v.id != displaced.version.id),
            }
        }
        let created = self.new_version.with_id(new_id);
        versions.push(created.clone());
        created
    }
}

/// Validate a promotion and decide what happens to each version.
///
/// Checks, in order: pending migration, source exists, target is `latest` or
/// a configured environment, source type differs from the target, and the
/// source is not a revision unless explicitly allowed.
pub fn plan_promotion(
    config: &CollectionConfig,
    versions: &[DocumentVersion],
    request: &PromotionRequest,
    migration_required: bool,
) -> Result<PromotionPlan> {
    if migration_required {
        return Err(Error::MigrationRequired(request.collection_key.clone()));
    }

    let source = versions
        .iter()
        .find(|v| v.id == request.from_version_id && v.document_id == request.document_id)
        .ok_or(Error::VersionNotFound(request.from_version_id))?;

    let target = &request.to_version_type;
    let valid_target = match target {
        VersionType::Latest => true,
        VersionType::Environment(key) => config.environments.contains(key),
        VersionType::Revision => false,
    };
    if !valid_target {
        return Err(Error::InvalidTargetVersion(target.to_string()));
    }

    if &source.version_type == target {
        return Err(Error::SameVersionType {
            version_id: source.id,
            version_type: target.to_string(),
        });
    }

    if source.version_type == VersionType::Revision && !request.allow_revision_source {
        return Err(Error::RevisionSource(source.id));
    }

    let displaced = versions
        .iter()
        .find(|v| v.document_id == request.document_id && &v.version_type == target)
        .map(|v| DisplacedVersion {
            version: v.clone(),
            action: if config.use_revisions {
                DisplacedAction::Retype
            } else {
                DisplacedAction::Delete
            },
        });

    tracing::debug!(
        collection = %request.collection_key,
        document_id = request.document_id,
        version_id = source.id,
        target = %target,
        displaced = ?displaced.as_ref().map(|d| d.version.id),
        "planned promotion"
    );

    Ok(PromotionPlan {
        source: source.clone(),
        displaced,
        new_version: NewVersion {
            document_id: request.document_id,
            version_type: target.clone(),
            content_id: source.content_id.clone(),
            promoted_from: source.id,
        },
    })
}

/// Whether an environment holds the same content as `latest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub environment: String,
    pub version_id: VersionId,
    pub up_to_date: bool,
}

/// Sync state of every environment version, compared by content id.
pub fn sync_status(versions: &[DocumentVersion]) -> Vec<EnvironmentStatus> {
    let latest = versions
        .iter()
        .find(|v| v.version_type == VersionType::Latest)
        .map(|v| v.content_id.as_str());

    let mut statuses: Vec<_> = versions
        .iter()
        .filter(|v| v.version_type.is_environment())
        .map(|v| EnvironmentStatus {
            environment: v.version_type.to_string(),
            version_id: v.id,
            up_to_date: latest == Some(v.content_id.as_str()),
        })
        .collect();
    statuses.sort_by(|a, b| a.environment.cmp(&b.environment));
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(use_revisions: bool) -> CollectionConfig {
        CollectionConfig {
            use_revisions,
            environments: vec!["published".into()],
        }
    }

    fn version(id: VersionId, version_type: VersionType, content: &str) -> DocumentVersion {
        DocumentVersion {
            id,
            document_id: 1,
            version_type,
            content_id: content.into(),
            promoted_from: None,
        }
    }

    fn request(from: VersionId, to: VersionType) -> PromotionRequest {
        PromotionRequest {
            collection_key: "blog".into(),
            document_id: 1,
            from_version_id: from,
            to_version_type: to,
            allow_revision_source: false,
        }
    }

    fn published() -> VersionType {
        VersionType::Environment("published".into())
    }

    #[test]
    fn version_type_strings() {
        assert_eq!("latest".parse::<VersionType>().unwrap(), VersionType::Latest);
        assert_eq!("published".parse::<VersionType>().unwrap(), published());
        assert!("Bad Env".parse::<VersionType>().is_err());
        assert_eq!(serde_json::to_string(&VersionType::Revision).unwrap(), "\"revision\"");
        let parsed: VersionType = serde_json::from_str("\"published\"").unwrap();
        assert_eq!(parsed, published());
    }

    #[test]
    fn first_promotion_creates_environment_version() {
        let versions = vec![version(1, VersionType::Latest, "c1")];
        let plan = plan_promotion(&config(true), &versions, &request(1, published()), false).unwrap();
        assert!(plan.displaced.is_none());
        assert_eq!(plan.new_version.content_id, "c1");
        assert_eq!(plan.new_version.promoted_from, 1);
    }

    #[test]
    fn displaced_version_retyped_or_deleted() {
        let versions = vec![
            version(1, VersionType::Latest, "c2"),
            version(2, published(), "c1"),
        ];

        let plan = plan_promotion(&config(true), &versions, &request(1, published()), false).unwrap();
        let displaced = plan.displaced.as_ref().unwrap();
        assert_eq!(displaced.version.id, 2);
        assert_eq!(displaced.action, DisplacedAction::Retype);

        let mut state = versions.clone();
        let created = plan.apply(&mut state, 3);
        let revision = state.iter().find(|v| v.id == 2).unwrap();
        assert_eq!(revision.version_type, VersionType::Revision);
        assert_eq!(revision.promoted_from, Some(created.id));

        let plan = plan_promotion(&config(false), &versions, &request(1, published()), false).unwrap();
        let mut state = versions.clone();
        plan.apply(&mut state, 3);
        assert!(state.iter().all(|v| v.id != 2));
    }

    #[test]
    fn rejected_before_any_write() {
        let versions = vec![
            version(1, VersionType::Latest, "c1"),
            version(2, VersionType::Revision, "c0"),
        ];
        let cfg = config(true);

        assert_eq!(
            plan_promotion(&cfg, &versions, &request(1, published()), true),
            Err(Error::MigrationRequired("blog".into()))
        );
        assert!(matches!(
            plan_promotion(&cfg, &versions, &request(1, VersionType::Latest), false),
            Err(Error::SameVersionType { version_id: 1, .. })
        ));
        assert_eq!(
            plan_promotion(&cfg, &versions, &request(2, VersionType::Latest), false),
            Err(Error::RevisionSource(2))
        );
        assert_eq!(
            plan_promotion(&cfg, &versions, &request(9, published()), false),
            Err(Error::VersionNotFound(9))
        );
        assert_eq!(
            plan_promotion(
                &cfg,
                &versions,
                &request(1, VersionType::Environment("staging".into())),
                false
            ),
            Err(Error::InvalidTargetVersion("staging".into()))
        );
        assert_eq!(
            plan_promotion(&cfg, &versions, &request(1, VersionType::Revision), false),
            Err(Error::InvalidTargetVersion("revision".into()))
        );

        let mut allowed = request(2, VersionType::Latest);
        allowed.allow_revision_source = true;
        let plan = plan_promotion(&cfg, &versions, &allowed, false).unwrap();
        assert_eq!(plan.displaced.unwrap().version.id, 1);
    }

    #[test]
    fn sync_by_content_id() {
        let versions = vec![
            version(1, VersionType::Latest, "c2"),
            version(2, published(), "c2"),
            version(3, VersionType::Environment("staging".into()), "c1"),
        ];
        let status = sync_status(&versions);
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].environment, "published");
        assert!(status[0].up_to_date);
        assert!(!status[1].up_to_date);
    }
}

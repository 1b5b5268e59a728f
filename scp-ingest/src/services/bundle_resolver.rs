//! Bundle resolution
//!
//! Companion files can be uploaded before or after their parent. Each file
//! is resolved when it is dispatched, so whichever member arrives last
//! completes the bundle.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::error::Result;
use crate::models::{Bundle, BundleRequirement, StagedAssociation, StudyFile};

pub struct BundleResolver {
    db: SqlitePool,
}

impl BundleResolver {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record that `child` was uploaded for `parent_file_id`
    pub async fn stage_child(&self, child: &StudyFile, parent_file_id: Uuid) -> Result<StagedAssociation> {
        let association = StagedAssociation::for_child(child, parent_file_id)?;
        db::bundles::stage_association(&self.db, &association).await?;
        tracing::debug!(
            file_id = %child.id,
            parent_file_id = %parent_file_id,
            staging_key = %association.staging_key,
            "Staged bundle association"
        );
        Ok(association)
    }

    /// Attach `file` to its bundle, creating the bundle when needed
    ///
    /// **Algorithm:**
    /// 1. Child already bundled: return the existing bundle
    /// 2. Parent type: attach every live staged child of an allowed type
    /// 3. Child type: attach to the staged parent when it is live
    ///
    /// Returns `None` when nothing matches yet; that is not an error.
    pub async fn resolve(&self, file: &StudyFile) -> Result<Option<Bundle>> {
        if file.queued_for_deletion {
            return Ok(None);
        }

        if let Some(requirement) = BundleRequirement::for_parent(file.file_type) {
            return self.resolve_as_parent(file, requirement).await;
        }

        if let Some(requirement) = BundleRequirement::for_child(file.file_type) {
            if let Some(bundle_id) = file.bundle_id {
                return Ok(db::bundles::load_bundle(&self.db, bundle_id).await?);
            }
            return self.resolve_as_child(file, requirement).await;
        }

        Ok(None)
    }

    async fn resolve_as_parent(
        &self,
        parent: &StudyFile,
        requirement: &BundleRequirement,
    ) -> Result<Option<Bundle>> {
        let mut children = Vec::new();
        for association in db::bundles::list_staged_children(&self.db, parent.id).await? {
            if association.parent_type != parent.file_type {
                continue;
            }
            let Some(child) = db::files::load_study_file(&self.db, association.child_file_id).await? else {
                continue;
            };
            if child.queued_for_deletion
                || child.study_id != parent.study_id
                || !requirement.allows_child(child.file_type)
            {
                continue;
            }
            children.push(child);
        }

        if children.is_empty() {
            // Parent bundled earlier through one of its children
            return match parent.bundle_id {
                Some(bundle_id) => Ok(db::bundles::load_bundle(&self.db, bundle_id).await?),
                None => Ok(None),
            };
        }

        let bundle_id = db::bundles::get_or_create_bundle(&self.db, parent.study_id, parent.id).await?;
        for child in children.iter().filter(|c| c.bundle_id != Some(bundle_id)) {
            db::files::set_bundle_id(&self.db, child.id, bundle_id).await?;
            tracing::debug!(file_id = %child.id, bundle_id = %bundle_id, "Attached staged child to bundle");
        }

        Ok(db::bundles::load_bundle(&self.db, bundle_id).await?)
    }

    async fn resolve_as_child(
        &self,
        child: &StudyFile,
        requirement: &BundleRequirement,
    ) -> Result<Option<Bundle>> {
        let Some(association) = db::bundles::load_staged_association(&self.db, child.id).await? else {
            return Ok(None);
        };
        if association.parent_type != requirement.parent {
            tracing::warn!(
                file_id = %child.id,
                parent_type = %association.parent_type,
                "Staged parent type does not accept this file"
            );
            return Ok(None);
        }

        let parent = db::files::load_study_file(&self.db, association.parent_file_id).await?;
        let Some(parent) = parent.filter(|p| {
            !p.queued_for_deletion && p.file_type == requirement.parent && p.study_id == child.study_id
        }) else {
            return Ok(None);
        };

        let bundle_id = db::bundles::get_or_create_bundle(&self.db, parent.study_id, parent.id).await?;
        db::files::set_bundle_id(&self.db, child.id, bundle_id).await?;
        tracing::debug!(file_id = %child.id, bundle_id = %bundle_id, "Attached file to parent bundle");

        Ok(db::bundles::load_bundle(&self.db, bundle_id).await?)
    }
}

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tabshelf_core::{
    drop_order, Placement, Resource, ResourceDraft, ResourceId, ResourcePatch, Section, SectionId,
    ShelfError, Space, SpaceId, UserId, Workspace, WorkspaceId,
};
use tabshelf_store_sqlite::SqliteStore;

pub use tabshelf_store_sqlite::{
    Created, IntegrityReport, MoveOutcome, RepairSummary, SchemaStatus, StoredEntity,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";
/// Request header carrying the caller identity between client and service.
pub const USER_HEADER: &str = "x-tabshelf-user";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// Per-request caller context: who is acting and which space they last opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user: UserId,
    pub default_workspace: Workspace,
    pub active_space: Option<SpaceId>,
}

/// Where a reordered or moved item should land.
///
/// Either an explicit order, or a drop onto a sibling with a placement relative to it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Position<Id> {
    Explicit { order: u32 },
    Drop { target: Id, placement: Placement },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    #[serde(default)]
    pub order: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateResourceRequest {
    #[serde(flatten)]
    pub draft: ResourceDraft,
    #[serde(default)]
    pub order: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenameRequest {
    pub name: String,
}

/// Cross-scope move; a missing position appends to the new parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveRequest<P, Id> {
    pub parent: P,
    #[serde(default)]
    pub position: Option<Position<Id>>,
}

#[derive(Debug, Clone)]
pub struct ShelfApi {
    db_path: PathBuf,
}

impl ShelfApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = SqliteStore::open(&self.db_path)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when any integrity query fails to run.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = SqliteStore::open(&self.db_path)?;
        store.integrity_check()
    }

    /// # Errors
    /// Returns an error when a broken scope cannot be rewritten.
    pub fn repair_orders(&self) -> Result<RepairSummary> {
        let mut store = self.open_store()?;
        store.repair_orders()
    }

    /// # Errors
    /// Returns an error when the backup file cannot be written.
    pub fn backup(&self, out_file: &Path) -> Result<()> {
        let store = SqliteStore::open(&self.db_path)?;
        store.backup_database(out_file)
    }

    /// Build the caller's session, creating the account and default workspace on first use.
    ///
    /// # Errors
    /// Returns an error when the account cannot be initialized.
    pub fn open_session(&self, user: UserId) -> Result<Session> {
        let mut store = self.open_store()?;
        let default_workspace = store.ensure_account(&user)?;
        let active_space = store.last_active_space(&user)?.map(|space| space.id);
        Ok(Session { user, default_workspace, active_space })
    }

    /// # Errors
    /// Returns [`ShelfError::NotFound`] or [`ShelfError::Unauthorized`] for a missing or
    /// foreign entity.
    pub fn get<E: StoredEntity>(&self, session: &Session, id: E::Id) -> Result<E> {
        let store = self.open_store()?;
        store.get::<E>(&session.user, id)
    }

    /// Siblings under `parent`, in display order.
    ///
    /// # Errors
    /// Returns [`ShelfError::NotFound`] or [`ShelfError::Unauthorized`] for a missing or
    /// foreign parent.
    pub fn list<E: StoredEntity>(&self, session: &Session, parent: &E::ParentId) -> Result<Vec<E>> {
        let mut store = self.open_store()?;
        store.list::<E>(&session.user, parent)
    }

    /// Non-default workspaces of the caller. The default workspace lives on the session.
    ///
    /// # Errors
    /// Returns an error when the workspaces cannot be loaded.
    pub fn list_workspaces(&self, session: &Session) -> Result<Vec<Workspace>> {
        self.list::<Workspace>(session, &session.user)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`] for a blank name.
    pub fn create_workspace(
        &self,
        session: &Session,
        request: &CreateRequest,
    ) -> Result<Created<Workspace>> {
        let mut store = self.open_store()?;
        store.create_workspace(&session.user, &request.name, request.order)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`].
    pub fn create_space(
        &self,
        session: &Session,
        workspace_id: WorkspaceId,
        request: &CreateRequest,
    ) -> Result<Created<Space>> {
        let mut store = self.open_store()?;
        store.create_space(&session.user, workspace_id, &request.name, request.order)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`].
    pub fn create_section(
        &self,
        session: &Session,
        space_id: SpaceId,
        request: &CreateRequest,
    ) -> Result<Created<Section>> {
        let mut store = self.open_store()?;
        store.create_section(&session.user, space_id, &request.name, request.order)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`].
    pub fn create_resource(
        &self,
        session: &Session,
        section_id: SectionId,
        request: CreateResourceRequest,
    ) -> Result<Created<Resource>> {
        let mut store = self.open_store()?;
        store.create_resource(&session.user, section_id, request.draft, request.order)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`].
    pub fn rename<E: StoredEntity>(
        &self,
        session: &Session,
        id: E::Id,
        request: &RenameRequest,
    ) -> Result<E> {
        let mut store = self.open_store()?;
        store.rename::<E>(&session.user, id, &request.name)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`].
    pub fn update_resource(
        &self,
        session: &Session,
        id: ResourceId,
        patch: &ResourcePatch,
    ) -> Result<Resource> {
        let mut store = self.open_store()?;
        store.update_resource(&session.user, id, patch)
    }

    /// Reorder `id` within its scope and return the renumbered siblings.
    ///
    /// # Errors
    /// Returns [`ShelfError::InvalidState`] when a drop target lives in another scope or the
    /// item is pinned, [`ShelfError::NotFound`] or [`ShelfError::Unauthorized`] otherwise.
    pub fn reorder<E: StoredEntity>(
        &self,
        session: &Session,
        id: E::Id,
        position: &Position<E::Id>,
    ) -> Result<Vec<E>> {
        let mut store = self.open_store()?;
        let target = match position {
            Position::Explicit { order } => *order,
            Position::Drop { target, placement } => {
                let dragged = store.get::<E>(&session.user, id)?;
                let anchor = store.get::<E>(&session.user, *target)?;
                ensure_drop_anchor(&anchor, &dragged.parent_id())?;
                drop_order(Some(dragged.order()), anchor.order(), *placement)
            }
        };
        store.reorder::<E>(&session.user, id, target)
    }

    /// Move `id` under a new parent and return both renumbered scopes.
    ///
    /// # Errors
    /// Returns [`ShelfError::InvalidState`] for same-parent moves, pinned items, or a drop
    /// target outside the new parent; [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`] for missing or foreign items and parents.
    pub fn move_to<E: StoredEntity>(
        &self,
        session: &Session,
        id: E::Id,
        request: &MoveRequest<E::ParentId, E::Id>,
    ) -> Result<MoveOutcome<E>> {
        let mut store = self.open_store()?;
        let order = match &request.position {
            None => None,
            Some(Position::Explicit { order }) => Some(*order),
            Some(Position::Drop { target, placement }) => {
                let anchor = store.get::<E>(&session.user, *target)?;
                ensure_drop_anchor(&anchor, &request.parent)?;
                Some(drop_order(None, anchor.order(), *placement))
            }
        };
        store.move_to::<E>(&session.user, id, &request.parent, order)
    }

    /// Delete `id` with everything under it and return the remaining siblings.
    ///
    /// # Errors
    /// Returns [`ShelfError::InvalidState`] for the default workspace,
    /// [`ShelfError::NotFound`] or [`ShelfError::Unauthorized`] otherwise.
    pub fn delete<E: StoredEntity>(&self, session: &Session, id: E::Id) -> Result<Vec<E>> {
        let mut store = self.open_store()?;
        store.delete::<E>(&session.user, id)
    }

    /// Persist `space_id` as the caller's last active space and record it on the session.
    ///
    /// # Errors
    /// Returns [`ShelfError::NotFound`] or [`ShelfError::Unauthorized`].
    pub fn set_last_active_space(&self, session: &mut Session, space_id: SpaceId) -> Result<Space> {
        let mut store = self.open_store()?;
        let space = store.set_last_active_space(&session.user, space_id)?;
        session.active_space = Some(space.id);
        tracing::debug!(user = %session.user, space = %space.id, "activated space");
        Ok(space)
    }
}

fn ensure_drop_anchor<E: StoredEntity>(anchor: &E, parent: &E::ParentId) -> Result<()> {
    if anchor.pinned() || &anchor.parent_id() != parent {
        return Err(ShelfError::InvalidState(format!(
            "drop target {} {} is not a sibling in {parent}",
            E::KIND,
            anchor.id()
        ))
        .into());
    }
    Ok(())
}

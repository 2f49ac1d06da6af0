use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tabshelf_core::{
    changed_orders, insert_at, is_contiguous, normalize, order_snapshot, remove, reorder,
    validate_name, EntityKind, Ordered, Resource, ResourceDraft, ResourceId, ResourcePatch, Scoped,
    Section, SectionId, ShelfError, Space, SpaceId, UserId, Workspace, WorkspaceId,
};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

pub const DEFAULT_WORKSPACE_NAME: &str = "Default";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workspaces (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  name TEXT NOT NULL,
  is_default INTEGER NOT NULL DEFAULT 0 CHECK (is_default IN (0, 1)),
  sort_order INTEGER NOT NULL CHECK (sort_order >= 0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS spaces (
  id TEXT PRIMARY KEY,
  workspace_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  name TEXT NOT NULL,
  is_last_active INTEGER NOT NULL DEFAULT 0 CHECK (is_last_active IN (0, 1)),
  sort_order INTEGER NOT NULL CHECK (sort_order >= 0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
  FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS sections (
  id TEXT PRIMARY KEY,
  space_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  name TEXT NOT NULL,
  sort_order INTEGER NOT NULL CHECK (sort_order >= 0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (space_id) REFERENCES spaces(id) ON DELETE CASCADE,
  FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS resources (
  id TEXT PRIMARY KEY,
  section_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  title TEXT NOT NULL,
  url TEXT NOT NULL,
  favicon_url TEXT,
  mime_type TEXT,
  description TEXT,
  is_google_drive INTEGER NOT NULL DEFAULT 0 CHECK (is_google_drive IN (0, 1)),
  sort_order INTEGER NOT NULL CHECK (sort_order >= 0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE,
  FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_workspaces_scope ON workspaces(user_id, is_default, sort_order);
CREATE INDEX IF NOT EXISTS idx_spaces_scope ON spaces(workspace_id, sort_order);
CREATE INDEX IF NOT EXISTS idx_sections_scope ON sections(space_id, sort_order);
CREATE INDEX IF NOT EXISTS idx_resources_scope ON resources(section_id, sort_order);
";

const MIGRATION_002_SQL: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_workspaces_one_default
  ON workspaces(user_id) WHERE is_default = 1;
CREATE UNIQUE INDEX IF NOT EXISTS idx_spaces_one_last_active
  ON spaces(user_id) WHERE is_last_active = 1;
";

/// Table layout of one sibling scope.
#[derive(Debug, Clone, Copy)]
struct ScopeSpec {
    table: &'static str,
    parent_column: &'static str,
    filter: &'static str,
}

fn scope_spec(kind: EntityKind) -> ScopeSpec {
    match kind {
        EntityKind::Workspace => ScopeSpec {
            table: "workspaces",
            parent_column: "user_id",
            filter: " AND is_default = 0",
        },
        EntityKind::Space => {
            ScopeSpec { table: "spaces", parent_column: "workspace_id", filter: "" }
        }
        EntityKind::Section => {
            ScopeSpec { table: "sections", parent_column: "space_id", filter: "" }
        }
        EntityKind::Resource => {
            ScopeSpec { table: "resources", parent_column: "section_id", filter: "" }
        }
    }
}

/// Row mapping for an entity kind persisted in its own table.
pub trait StoredEntity: Scoped {
    const SELECT_COLUMNS: &'static str;
    const LABEL_COLUMN: &'static str;

    /// Decode one row selected with [`Self::SELECT_COLUMNS`].
    ///
    /// # Errors
    /// Returns a conversion error when a stored ID or timestamp is malformed.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// # Errors
    /// Returns an error when the insert fails.
    fn insert_row(&self, conn: &Connection) -> Result<()>;

    fn owner(&self) -> &UserId;

    fn touch(&mut self, at: OffsetDateTime);

    /// Pinned entities never take part in reorder, move, or delete.
    fn pinned(&self) -> bool {
        false
    }
}

impl StoredEntity for Workspace {
    const SELECT_COLUMNS: &'static str =
        "id, user_id, name, is_default, sort_order, created_at, updated_at";
    const LABEL_COLUMN: &'static str = "name";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: column_id::<WorkspaceId>(row, 0)?,
            user_id: column_user(row, 1)?,
            name: row.get(2)?,
            is_default: row.get(3)?,
            order: row.get(4)?,
            created_at: column_time(row, 5)?,
            updated_at: column_time(row, 6)?,
        })
    }

    fn insert_row(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO workspaces(id, user_id, name, is_default, sort_order, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.id.to_string(),
                self.user_id.as_str(),
                self.name,
                self.is_default,
                self.order,
                rfc3339(self.created_at)?,
                rfc3339(self.updated_at)?,
            ],
        )
        .context("failed to insert workspace")?;
        Ok(())
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }

    fn touch(&mut self, at: OffsetDateTime) {
        self.updated_at = at;
    }

    fn pinned(&self) -> bool {
        self.is_default
    }
}

impl StoredEntity for Space {
    const SELECT_COLUMNS: &'static str =
        "id, workspace_id, user_id, name, is_last_active, sort_order, created_at, updated_at";
    const LABEL_COLUMN: &'static str = "name";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: column_id::<SpaceId>(row, 0)?,
            workspace_id: column_id::<WorkspaceId>(row, 1)?,
            user_id: column_user(row, 2)?,
            name: row.get(3)?,
            is_last_active: row.get(4)?,
            order: row.get(5)?,
            created_at: column_time(row, 6)?,
            updated_at: column_time(row, 7)?,
        })
    }

    fn insert_row(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO spaces(
                id, workspace_id, user_id, name, is_last_active, sort_order, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.id.to_string(),
                self.workspace_id.to_string(),
                self.user_id.as_str(),
                self.name,
                self.is_last_active,
                self.order,
                rfc3339(self.created_at)?,
                rfc3339(self.updated_at)?,
            ],
        )
        .context("failed to insert space")?;
        Ok(())
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }

    fn touch(&mut self, at: OffsetDateTime) {
        self.updated_at = at;
    }
}

impl StoredEntity for Section {
    const SELECT_COLUMNS: &'static str =
        "id, space_id, user_id, name, sort_order, created_at, updated_at";
    const LABEL_COLUMN: &'static str = "name";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: column_id::<SectionId>(row, 0)?,
            space_id: column_id::<SpaceId>(row, 1)?,
            user_id: column_user(row, 2)?,
            name: row.get(3)?,
            order: row.get(4)?,
            created_at: column_time(row, 5)?,
            updated_at: column_time(row, 6)?,
        })
    }

    fn insert_row(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO sections(id, space_id, user_id, name, sort_order, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.id.to_string(),
                self.space_id.to_string(),
                self.user_id.as_str(),
                self.name,
                self.order,
                rfc3339(self.created_at)?,
                rfc3339(self.updated_at)?,
            ],
        )
        .context("failed to insert section")?;
        Ok(())
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }

    fn touch(&mut self, at: OffsetDateTime) {
        self.updated_at = at;
    }
}

impl StoredEntity for Resource {
    const SELECT_COLUMNS: &'static str = "id, section_id, user_id, title, url, favicon_url, \
         mime_type, description, is_google_drive, sort_order, created_at, updated_at";
    const LABEL_COLUMN: &'static str = "title";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: column_id::<ResourceId>(row, 0)?,
            section_id: column_id::<SectionId>(row, 1)?,
            user_id: column_user(row, 2)?,
            title: row.get(3)?,
            url: row.get(4)?,
            favicon_url: row.get(5)?,
            mime_type: row.get(6)?,
            description: row.get(7)?,
            is_google_drive: row.get(8)?,
            order: row.get(9)?,
            created_at: column_time(row, 10)?,
            updated_at: column_time(row, 11)?,
        })
    }

    fn insert_row(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO resources(
                id, section_id, user_id, title, url, favicon_url, mime_type, description,
                is_google_drive, sort_order, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                self.id.to_string(),
                self.section_id.to_string(),
                self.user_id.as_str(),
                self.title,
                self.url,
                self.favicon_url,
                self.mime_type,
                self.description,
                self.is_google_drive,
                self.order,
                rfc3339(self.created_at)?,
                rfc3339(self.updated_at)?,
            ],
        )
        .context("failed to insert resource")?;
        Ok(())
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }

    fn touch(&mut self, at: OffsetDateTime) {
        self.updated_at = at;
    }
}

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

/// A sibling scope whose stored orders are not exactly `0..N-1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderViolation {
    pub kind: EntityKind,
    pub scope_id: String,
    pub orders: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub order_violations: Vec<OrderViolation>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepairSummary {
    pub scopes_repaired: usize,
    pub rows_updated: usize,
}

/// Result of a cross-scope move: the moved entity plus both affected sibling lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveOutcome<E> {
    pub moved: E,
    pub source: Vec<E>,
    pub target: Vec<E>,
}

/// A created entity together with its freshly renumbered siblings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Created<E> {
    pub created: E,
    pub siblings: Vec<E>,
}

impl SqliteStore {
    /// Open a SQLite-backed shelf store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        if recorded_schema_version(&self.conn)? == Some(LATEST_SCHEMA_VERSION) {
            return Ok(());
        }
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (target, sql) in [(1_i64, MIGRATION_001_SQL), (2_i64, MIGRATION_002_SQL)] {
            if version >= target {
                continue;
            }
            let tx = self
                .conn
                .transaction()
                .with_context(|| format!("failed to start migration v{target} transaction"))?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{target}"))?;
            record_schema_version(&tx, target)?;
            tx.commit().with_context(|| format!("failed to commit migration v{target}"))?;
            tracing::info!(version = target, "applied schema migration");
        }

        Ok(())
    }

    fn immediate(&mut self) -> Result<rusqlite::Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start write transaction")
    }

    /// Register `user` and create their pinned default workspace on first sight.
    ///
    /// Known accounts are answered from a plain read; only a first sighting takes the write lock.
    ///
    /// # Errors
    /// Returns an error when the user or workspace rows cannot be written.
    pub fn ensure_account(&mut self, user: &UserId) -> Result<Workspace> {
        if let Some(workspace) = find_default_workspace(&self.conn, user)? {
            return Ok(workspace);
        }

        let tx = self.immediate()?;
        let now = OffsetDateTime::now_utc();
        ensure_user_row(&tx, user, now)?;

        let workspace = if let Some(workspace) = find_default_workspace(&tx, user)? {
            workspace
        } else {
            let workspace = Workspace {
                id: WorkspaceId::new(),
                user_id: user.clone(),
                name: DEFAULT_WORKSPACE_NAME.to_string(),
                is_default: true,
                order: 0,
                created_at: now,
                updated_at: now,
            };
            workspace.insert_row(&tx)?;
            tracing::info!(user = %user, workspace = %workspace.id, "created default workspace");
            workspace
        };

        tx.commit().context("failed to commit account transaction")?;
        Ok(workspace)
    }

    /// # Errors
    /// Returns [`ShelfError::NotFound`] when the account has not been initialized.
    pub fn default_workspace(&self, user: &UserId) -> Result<Workspace> {
        find_default_workspace(&self.conn, user)?.ok_or_else(|| {
            ShelfError::NotFound(format!("no default workspace for user {user}")).into()
        })
    }

    /// Load one entity owned by `user`.
    ///
    /// # Errors
    /// Returns [`ShelfError::NotFound`] or [`ShelfError::Unauthorized`].
    pub fn get<E: StoredEntity>(&self, user: &UserId, id: E::Id) -> Result<E> {
        load_owned::<E>(&self.conn, user, id)
    }

    /// All siblings under `parent`, sorted by order.
    ///
    /// A scope found with gaps or duplicate orders is renormalized in place before returning.
    ///
    /// # Errors
    /// Returns [`ShelfError::NotFound`] / [`ShelfError::Unauthorized`] for a foreign or missing
    /// parent, or a storage error.
    pub fn list<E: StoredEntity>(&mut self, user: &UserId, parent: &E::ParentId) -> Result<Vec<E>> {
        check_parent::<E>(&self.conn, user, parent)?;
        let parent_key = parent.to_string();
        let items = load_scope::<E>(&self.conn, &parent_key)?;
        if is_contiguous(&items) {
            return Ok(items);
        }

        let tx = self.immediate()?;
        repair_scope(&tx, E::KIND, &parent_key)?;
        let items = load_scope::<E>(&tx, &parent_key)?;
        tx.commit().context("failed to commit order repair")?;
        Ok(items)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`] for a blank name, or a storage error.
    pub fn create_workspace(
        &mut self,
        user: &UserId,
        name: &str,
        order: Option<u32>,
    ) -> Result<Created<Workspace>> {
        validate_name("name", name)?;
        let now = OffsetDateTime::now_utc();
        let tx = self.immediate()?;
        ensure_user_row(&tx, user, now)?;
        let workspace = Workspace {
            id: WorkspaceId::new(),
            user_id: user.clone(),
            name: name.trim().to_string(),
            is_default: false,
            order: 0,
            created_at: now,
            updated_at: now,
        };
        let created = insert_entity(&tx, workspace, order)?;
        tx.commit().context("failed to commit workspace create")?;
        Ok(created)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`], or a storage error.
    pub fn create_space(
        &mut self,
        user: &UserId,
        workspace_id: WorkspaceId,
        name: &str,
        order: Option<u32>,
    ) -> Result<Created<Space>> {
        validate_name("name", name)?;
        let now = OffsetDateTime::now_utc();
        let tx = self.immediate()?;
        check_parent::<Space>(&tx, user, &workspace_id)?;
        let space = Space {
            id: SpaceId::new(),
            workspace_id,
            user_id: user.clone(),
            name: name.trim().to_string(),
            is_last_active: false,
            order: 0,
            created_at: now,
            updated_at: now,
        };
        let created = insert_entity(&tx, space, order)?;
        tx.commit().context("failed to commit space create")?;
        Ok(created)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`], or a storage error.
    pub fn create_section(
        &mut self,
        user: &UserId,
        space_id: SpaceId,
        name: &str,
        order: Option<u32>,
    ) -> Result<Created<Section>> {
        validate_name("name", name)?;
        let now = OffsetDateTime::now_utc();
        let tx = self.immediate()?;
        check_parent::<Section>(&tx, user, &space_id)?;
        let section = Section {
            id: SectionId::new(),
            space_id,
            user_id: user.clone(),
            name: name.trim().to_string(),
            order: 0,
            created_at: now,
            updated_at: now,
        };
        let created = insert_entity(&tx, section, order)?;
        tx.commit().context("failed to commit section create")?;
        Ok(created)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`], or a storage error.
    pub fn create_resource(
        &mut self,
        user: &UserId,
        section_id: SectionId,
        draft: ResourceDraft,
        order: Option<u32>,
    ) -> Result<Created<Resource>> {
        draft.validate()?;
        let now = OffsetDateTime::now_utc();
        let tx = self.immediate()?;
        check_parent::<Resource>(&tx, user, &section_id)?;
        let resource = Resource {
            id: ResourceId::new(),
            section_id,
            user_id: user.clone(),
            title: draft.title.trim().to_string(),
            url: draft.url.trim().to_string(),
            favicon_url: draft.favicon_url,
            mime_type: draft.mime_type,
            description: draft.description,
            is_google_drive: draft.is_google_drive,
            order: 0,
            created_at: now,
            updated_at: now,
        };
        let created = insert_entity(&tx, resource, order)?;
        tx.commit().context("failed to commit resource create")?;
        Ok(created)
    }

    /// Change the display label (`name` or `title`) of one entity.
    ///
    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`], or a storage error.
    pub fn rename<E: StoredEntity>(&mut self, user: &UserId, id: E::Id, label: &str) -> Result<E> {
        validate_name(E::LABEL_COLUMN, label)?;
        let tx = self.immediate()?;
        let mut entity = load_owned::<E>(&tx, user, id)?;
        let now = OffsetDateTime::now_utc();
        let spec = scope_spec(E::KIND);
        let query = format!(
            "UPDATE {} SET {} = ?1, updated_at = ?2 WHERE id = ?3",
            spec.table,
            E::LABEL_COLUMN
        );
        tx.execute(&query, params![label.trim(), rfc3339(now)?, id.to_string()])
            .with_context(|| format!("failed to rename {}", E::KIND))?;
        tx.commit().context("failed to commit rename")?;

        entity.set_label(label.trim().to_string());
        entity.touch(now);
        Ok(entity)
    }

    /// # Errors
    /// Returns [`ShelfError::Validation`], [`ShelfError::NotFound`] or
    /// [`ShelfError::Unauthorized`], or a storage error.
    pub fn update_resource(
        &mut self,
        user: &UserId,
        id: ResourceId,
        patch: &ResourcePatch,
    ) -> Result<Resource> {
        patch.validate()?;
        let tx = self.immediate()?;
        let mut resource = load_owned::<Resource>(&tx, user, id)?;
        if patch.is_empty() {
            return Ok(resource);
        }

        patch.apply(&mut resource);
        let now = OffsetDateTime::now_utc();
        resource.touch(now);
        tx.execute(
            "UPDATE resources
             SET title = ?1, url = ?2, favicon_url = ?3, description = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                resource.title,
                resource.url,
                resource.favicon_url,
                resource.description,
                rfc3339(now)?,
                id.to_string(),
            ],
        )
        .context("failed to update resource")?;
        tx.commit().context("failed to commit resource update")?;
        Ok(resource)
    }

    /// Move `id` to position `target` within its current scope.
    ///
    /// # Errors
    /// Returns [`ShelfError::NotFound`], [`ShelfError::Unauthorized`], or
    /// [`ShelfError::InvalidState`] for pinned entities; nothing is written on error.
    pub fn reorder<E: StoredEntity>(
        &mut self,
        user: &UserId,
        id: E::Id,
        target: u32,
    ) -> Result<Vec<E>> {
        let tx = self.immediate()?;
        let entity = load_owned::<E>(&tx, user, id)?;
        ensure_unpinned(&entity, "reordered")?;

        let parent_key = entity.parent_id().to_string();
        let siblings = load_scope::<E>(&tx, &parent_key)?;
        let before = order_snapshot(&siblings);
        let after = reorder(siblings, id, target)?;
        write_orders::<E>(&tx, &changed_orders(&before, &after))?;
        tx.commit().context("failed to commit reorder")?;

        tracing::debug!(kind = %E::KIND, id = %id, target, "reordered");
        Ok(after)
    }

    /// Move `id` into `target_parent` at `target` (append when `None`).
    ///
    /// Source gap closing, target insertion, and the parent change commit together.
    ///
    /// # Errors
    /// Returns [`ShelfError::InvalidState`] when the target is the current parent or the entity
    /// kind cannot change parents, [`ShelfError::NotFound`] or [`ShelfError::Unauthorized`]
    /// for a missing or foreign item or parent.
    pub fn move_to<E: StoredEntity>(
        &mut self,
        user: &UserId,
        id: E::Id,
        target_parent: &E::ParentId,
        target: Option<u32>,
    ) -> Result<MoveOutcome<E>> {
        if E::KIND.parent_kind().is_none() {
            return Err(
                ShelfError::InvalidState(format!("{} cannot change parents", E::KIND)).into()
            );
        }

        let tx = self.immediate()?;
        let entity = load_owned::<E>(&tx, user, id)?;
        ensure_unpinned(&entity, "moved")?;
        let source_parent = entity.parent_id();
        if &source_parent == target_parent {
            return Err(ShelfError::InvalidState(format!(
                "{} {id} already belongs to {target_parent}; use reorder instead",
                E::KIND
            ))
            .into());
        }
        check_parent::<E>(&tx, user, target_parent)?;

        let source_siblings = load_scope::<E>(&tx, &source_parent.to_string())?;
        let source_before = order_snapshot(&source_siblings);
        let (mut moved, source_after) = remove(source_siblings, id)?;
        write_orders::<E>(&tx, &changed_orders(&source_before, &source_after))?;

        let target_siblings = load_scope::<E>(&tx, &target_parent.to_string())?;
        let target_before = order_snapshot(&target_siblings);
        let now = OffsetDateTime::now_utc();
        moved.set_parent_id(target_parent.clone());
        moved.touch(now);
        let target_after = insert_at(target_siblings, moved, target);
        let shifted = changed_orders(&target_before, &target_after)
            .into_iter()
            .filter(|(changed_id, _)| *changed_id != id)
            .collect::<Vec<_>>();
        write_orders::<E>(&tx, &shifted)?;

        let Some(moved) = target_after.iter().find(|item| item.id() == id).cloned() else {
            return Err(anyhow!("moved {} {id} missing from target scope", E::KIND));
        };
        let spec = scope_spec(E::KIND);
        let query = format!(
            "UPDATE {} SET {} = ?1, sort_order = ?2, updated_at = ?3 WHERE id = ?4",
            spec.table, spec.parent_column
        );
        tx.execute(
            &query,
            params![target_parent.to_string(), moved.order(), rfc3339(now)?, id.to_string()],
        )
        .with_context(|| format!("failed to reparent {}", E::KIND))?;

        tx.commit().context("failed to commit move")?;
        tracing::debug!(
            kind = %E::KIND,
            id = %id,
            from = %source_parent,
            to = %target_parent,
            order = moved.order(),
            "moved"
        );

        Ok(MoveOutcome { moved, source: source_after, target: target_after })
    }

    /// Delete `id` (cascading to descendants) and close the gap among its siblings.
    ///
    /// # Errors
    /// Returns [`ShelfError::NotFound`], [`ShelfError::Unauthorized`], or
    /// [`ShelfError::InvalidState`] for pinned entities.
    pub fn delete<E: StoredEntity>(&mut self, user: &UserId, id: E::Id) -> Result<Vec<E>> {
        let tx = self.immediate()?;
        let entity = load_owned::<E>(&tx, user, id)?;
        ensure_unpinned(&entity, "deleted")?;

        let spec = scope_spec(E::KIND);
        tx.execute(&format!("DELETE FROM {} WHERE id = ?1", spec.table), params![id.to_string()])
            .with_context(|| format!("failed to delete {}", E::KIND))?;

        let siblings = load_scope::<E>(&tx, &entity.parent_id().to_string())?;
        let before = order_snapshot(&siblings);
        let after = normalize(siblings);
        write_orders::<E>(&tx, &changed_orders(&before, &after))?;
        tx.commit().context("failed to commit delete")?;

        tracing::debug!(kind = %E::KIND, id = %id, order = entity.order(), "deleted");
        Ok(after)
    }

    /// Flag `space_id` as the user's last active space, clearing any previous flag.
    ///
    /// # Errors
    /// Returns [`ShelfError::NotFound`] or [`ShelfError::Unauthorized`], or a storage error.
    pub fn set_last_active_space(&mut self, user: &UserId, space_id: SpaceId) -> Result<Space> {
        let tx = self.immediate()?;
        let mut space = load_owned::<Space>(&tx, user, space_id)?;
        tx.execute(
            "UPDATE spaces SET is_last_active = 0 WHERE user_id = ?1 AND is_last_active = 1",
            params![user.as_str()],
        )
        .context("failed to clear last active space")?;
        tx.execute(
            "UPDATE spaces SET is_last_active = 1 WHERE id = ?1",
            params![space_id.to_string()],
        )
        .context("failed to mark last active space")?;
        tx.commit().context("failed to commit last active space")?;

        space.is_last_active = true;
        Ok(space)
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn last_active_space(&self, user: &UserId) -> Result<Option<Space>> {
        let query = format!(
            "SELECT {} FROM spaces WHERE user_id = ?1 AND is_last_active = 1",
            Space::SELECT_COLUMNS
        );
        let space =
            self.conn.query_row(&query, params![user.as_str()], Space::from_row).optional()?;
        Ok(space)
    }

    /// Renormalize every scope whose orders are not contiguous.
    ///
    /// # Errors
    /// Returns an error when any scope cannot be read or rewritten; no repair is kept then.
    pub fn repair_orders(&mut self) -> Result<RepairSummary> {
        let tx = self.immediate()?;
        let mut summary = RepairSummary { scopes_repaired: 0, rows_updated: 0 };
        for kind in ALL_KINDS {
            for violation in order_violations(&tx, kind)? {
                summary.rows_updated += repair_scope(&tx, kind, &violation.scope_id)?;
                summary.scopes_repaired += 1;
            }
        }
        tx.commit().context("failed to commit order repair")?;
        Ok(summary)
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, order-contiguity and schema status checks.
    ///
    /// # Errors
    /// Returns an error when any integrity query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let mut order_violations_found = Vec::new();
        for kind in ALL_KINDS {
            order_violations_found.extend(order_violations(&self.conn, kind)?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            order_violations: order_violations_found,
            schema_status,
        })
    }
}

const ALL_KINDS: [EntityKind; 4] =
    [EntityKind::Workspace, EntityKind::Space, EntityKind::Section, EntityKind::Resource];

/// Minimal projection used to renumber a scope without decoding full entities.
#[derive(Debug, Clone)]
struct SiblingRow {
    rowid: i64,
    order: u32,
}

impl Ordered for SiblingRow {
    type Id = i64;

    fn id(&self) -> Self::Id {
        self.rowid
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}

fn ensure_user_row(conn: &Connection, user: &UserId, now: OffsetDateTime) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO users(id, created_at) VALUES (?1, ?2)",
        params![user.as_str(), rfc3339(now)?],
    )
    .context("failed to register user")?;
    Ok(())
}

fn ensure_unpinned<E: StoredEntity>(entity: &E, action: &str) -> Result<()> {
    if entity.pinned() {
        return Err(ShelfError::InvalidState(format!(
            "default {} {} cannot be {action}",
            E::KIND,
            entity.id()
        ))
        .into());
    }
    Ok(())
}

fn load_scope<E: StoredEntity>(conn: &Connection, parent: &str) -> Result<Vec<E>> {
    let spec = scope_spec(E::KIND);
    let query = format!(
        "SELECT {} FROM {} WHERE {} = ?1{} ORDER BY sort_order ASC, created_at ASC, id ASC",
        E::SELECT_COLUMNS,
        spec.table,
        spec.parent_column,
        spec.filter
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params![parent], E::from_row)?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

fn load_owned<E: StoredEntity>(conn: &Connection, user: &UserId, id: E::Id) -> Result<E> {
    let spec = scope_spec(E::KIND);
    let query = format!("SELECT {} FROM {} WHERE id = ?1", E::SELECT_COLUMNS, spec.table);
    let Some(entity) = conn.query_row(&query, params![id.to_string()], E::from_row).optional()?
    else {
        return Err(ShelfError::NotFound(format!("{} {id} does not exist", E::KIND)).into());
    };
    if entity.owner() != user {
        return Err(ShelfError::Unauthorized(format!("{} {id} is not owned by caller", E::KIND))
            .into());
    }
    Ok(entity)
}

fn check_parent<E: StoredEntity>(
    conn: &Connection,
    user: &UserId,
    parent: &E::ParentId,
) -> Result<()> {
    let parent_key = parent.to_string();
    let Some(parent_kind) = E::KIND.parent_kind() else {
        if parent_key != user.as_str() {
            return Err(ShelfError::Unauthorized(format!(
                "workspaces of {parent_key} are not visible to caller"
            ))
            .into());
        }
        return Ok(());
    };

    let spec = scope_spec(parent_kind);
    let owner = conn
        .query_row(
            &format!("SELECT user_id FROM {} WHERE id = ?1", spec.table),
            params![parent_key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    match owner {
        None => Err(ShelfError::NotFound(format!("{parent_kind} {parent_key} does not exist")).into()),
        Some(owner) if owner != user.as_str() => Err(ShelfError::Unauthorized(format!(
            "{parent_kind} {parent_key} is not owned by caller"
        ))
        .into()),
        Some(_) => Ok(()),
    }
}

fn insert_entity<E: StoredEntity>(
    conn: &Connection,
    entity: E,
    target: Option<u32>,
) -> Result<Created<E>> {
    let parent_key = entity.parent_id().to_string();
    let id = entity.id();
    let siblings = load_scope::<E>(conn, &parent_key)?;
    let before = order_snapshot(&siblings);
    let after = insert_at(siblings, entity, target);

    let shifted = changed_orders(&before, &after)
        .into_iter()
        .filter(|(changed_id, _)| *changed_id != id)
        .collect::<Vec<_>>();
    write_orders::<E>(conn, &shifted)?;

    let Some(created) = after.iter().find(|item| item.id() == id).cloned() else {
        return Err(anyhow!("created {} {id} missing from its scope", E::KIND));
    };
    created.insert_row(conn)?;
    tracing::debug!(kind = %E::KIND, id = %id, order = created.order(), "created");
    Ok(Created { created, siblings: after })
}

fn write_orders<E: StoredEntity>(conn: &Connection, changes: &[(E::Id, u32)]) -> Result<()> {
    if changes.is_empty() {
        return Ok(());
    }
    let spec = scope_spec(E::KIND);
    let mut stmt = conn.prepare(&format!("UPDATE {} SET sort_order = ?1 WHERE id = ?2", spec.table))?;
    for (id, order) in changes {
        stmt.execute(params![order, id.to_string()])
            .with_context(|| format!("failed to renumber {} {id}", E::KIND))?;
    }
    Ok(())
}

fn load_sibling_rows(conn: &Connection, kind: EntityKind, parent: &str) -> Result<Vec<SiblingRow>> {
    let spec = scope_spec(kind);
    let query = format!(
        "SELECT rowid, sort_order FROM {} WHERE {} = ?1{} ORDER BY sort_order ASC, created_at ASC, id ASC",
        spec.table, spec.parent_column, spec.filter
    );
    let mut stmt = conn.prepare(&query)?;
    let rows =
        stmt.query_map(params![parent], |row| Ok(SiblingRow { rowid: row.get(0)?, order: row.get(1)? }))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

fn repair_scope(conn: &Connection, kind: EntityKind, parent: &str) -> Result<usize> {
    let rows = load_sibling_rows(conn, kind, parent)?;
    if is_contiguous(&rows) {
        return Ok(0);
    }

    let before = order_snapshot(&rows);
    let after = normalize(rows);
    let changes = changed_orders(&before, &after);
    let spec = scope_spec(kind);
    let mut stmt =
        conn.prepare(&format!("UPDATE {} SET sort_order = ?1 WHERE rowid = ?2", spec.table))?;
    for (rowid, order) in &changes {
        stmt.execute(params![order, rowid])
            .with_context(|| format!("failed to repair {kind} order in scope {parent}"))?;
    }

    tracing::warn!(
        kind = %kind,
        scope = parent,
        rows = changes.len(),
        "repaired non-contiguous sibling orders"
    );
    Ok(changes.len())
}

fn order_violations(conn: &Connection, kind: EntityKind) -> Result<Vec<OrderViolation>> {
    let spec = scope_spec(kind);
    let query = format!(
        "SELECT {parent}, sort_order FROM {table} WHERE {parent} IS NOT NULL{filter}
         ORDER BY {parent} ASC, sort_order ASC",
        parent = spec.parent_column,
        table = spec.table,
        filter = spec.filter
    );
    let mut stmt = conn.prepare(&query)?;
    let rows =
        stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?;

    let mut scopes: Vec<(String, Vec<u32>)> = Vec::new();
    for row in rows {
        let (scope_id, order) = row?;
        match scopes.last_mut() {
            Some((current, orders)) if *current == scope_id => orders.push(order),
            _ => scopes.push((scope_id, vec![order])),
        }
    }

    Ok(scopes
        .into_iter()
        .filter(|(_, orders)| {
            orders.iter().enumerate().any(|(index, order)| u32::try_from(index).ok() != Some(*order))
        })
        .map(|(scope_id, orders)| OrderViolation { kind, scope_id, orders })
        .collect())
}

fn find_default_workspace(conn: &Connection, user: &UserId) -> Result<Option<Workspace>> {
    let query = format!(
        "SELECT {} FROM workspaces WHERE user_id = ?1 AND is_default = 1",
        Workspace::SELECT_COLUMNS
    );
    let workspace =
        conn.query_row(&query, params![user.as_str()], Workspace::from_row).optional()?;
    Ok(workspace)
}

/// Schema version without creating `schema_migrations`; `None` for a fresh database.
fn recorded_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let present: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations')",
            [],
            |row| row.get(0),
        )
        .context("failed to look up schema_migrations table")?;
    if !present {
        return Ok(None);
    }
    current_schema_version(conn).map(Some)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn column_id<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ShelfError>,
{
    let raw: String = row.get(index)?;
    raw.parse::<T>().map_err(|err| conversion_error(index, err))
}

fn column_user(row: &Row<'_>, index: usize) -> rusqlite::Result<UserId> {
    let raw: String = row.get(index)?;
    UserId::parse(&raw).map_err(|err| conversion_error(index, err))
}

fn column_time(row: &Row<'_>, index: usize) -> rusqlite::Result<OffsetDateTime> {
    let raw: String = row.get(index)?;
    OffsetDateTime::parse(&raw, &time::format_description::well_known::Rfc3339)
        .map_err(|err| conversion_error(index, err))
}

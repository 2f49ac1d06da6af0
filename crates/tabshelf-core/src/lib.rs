use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub mod ordering;

pub use ordering::{
    changed_orders, clamp_insert_target, clamp_reorder_target, close_gap, drop_order, insert_at,
    is_contiguous, normalize, order_snapshot, remove, reorder, shift_plan, Placement, ShiftPlan,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ShelfError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transient failure: {0}")]
    TransientFailure(String),
}

impl ShelfError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Validation(_) => ErrorKind::Validation,
            Self::TransientFailure(_) => ErrorKind::TransientFailure,
        }
    }
}

/// Wire-stable classification of a [`ShelfError`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    InvalidState,
    Validation,
    TransientFailure,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::InvalidState => "invalid_state",
            Self::Validation => "validation",
            Self::TransientFailure => "transient_failure",
        }
    }
}

macro_rules! ulid_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
        )]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ShelfError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(raw).map(Self).map_err(|_| {
                    ShelfError::Validation(format!(
                        "invalid {} ULID: {raw}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

ulid_id!(WorkspaceId);
ulid_id!(SpaceId);
ulid_id!(SectionId);
ulid_id!(ResourceId);

/// Opaque identity handed over by the authentication layer.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Build a user identity from the subject the authenticator produced.
    ///
    /// # Errors
    /// Returns [`ShelfError::Validation`] for blank or oversized subjects.
    pub fn parse(raw: &str) -> Result<Self, ShelfError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ShelfError::Validation("user id MUST be non-empty".to_string()));
        }
        if trimmed.len() > 256 {
            return Err(ShelfError::Validation("user id MUST be at most 256 bytes".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ShelfError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workspace,
    Space,
    Section,
    Resource,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Space => "space",
            Self::Section => "section",
            Self::Resource => "resource",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "workspace" => Some(Self::Workspace),
            "space" => Some(Self::Space),
            "section" => Some(Self::Section),
            "resource" => Some(Self::Resource),
            _ => None,
        }
    }

    /// Kind of the entity that owns the sibling scope, `None` for workspaces (owned by a user).
    #[must_use]
    pub fn parent_kind(self) -> Option<Self> {
        match self {
            Self::Workspace => None,
            Self::Space => Some(Self::Workspace),
            Self::Section => Some(Self::Space),
            Self::Resource => Some(Self::Section),
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item that occupies one slot of a contiguous `0..N-1` sibling sequence.
pub trait Ordered {
    type Id: Copy + Eq + Display;

    fn id(&self) -> Self::Id;
    fn order(&self) -> u32;
    fn set_order(&mut self, order: u32);
}

/// An ordered item that belongs to exactly one parent scope.
pub trait Scoped: Ordered + Clone {
    type ParentId: Clone + Eq + Display;

    const KIND: EntityKind;

    fn parent_id(&self) -> Self::ParentId;
    fn set_parent_id(&mut self, parent: Self::ParentId);
    fn label(&self) -> &str;
    fn set_label(&mut self, label: String);
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub user_id: UserId,
    pub name: String,
    pub is_default: bool,
    pub order: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Space {
    pub id: SpaceId,
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub name: String,
    pub is_last_active: bool,
    pub order: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Section {
    pub id: SectionId,
    pub space_id: SpaceId,
    pub user_id: UserId,
    pub name: String,
    pub order: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub section_id: SectionId,
    pub user_id: UserId,
    pub title: String,
    pub url: String,
    pub favicon_url: Option<String>,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub is_google_drive: bool,
    pub order: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Ordered for Workspace {
    type Id = WorkspaceId;

    fn id(&self) -> Self::Id {
        self.id
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}

impl Scoped for Workspace {
    type ParentId = UserId;

    const KIND: EntityKind = EntityKind::Workspace;

    fn parent_id(&self) -> Self::ParentId {
        self.user_id.clone()
    }

    fn set_parent_id(&mut self, parent: Self::ParentId) {
        self.user_id = parent;
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn set_label(&mut self, label: String) {
        self.name = label;
    }
}

impl Ordered for Space {
    type Id = SpaceId;

    fn id(&self) -> Self::Id {
        self.id
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}

impl Scoped for Space {
    type ParentId = WorkspaceId;

    const KIND: EntityKind = EntityKind::Space;

    fn parent_id(&self) -> Self::ParentId {
        self.workspace_id
    }

    fn set_parent_id(&mut self, parent: Self::ParentId) {
        self.workspace_id = parent;
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn set_label(&mut self, label: String) {
        self.name = label;
    }
}

impl Ordered for Section {
    type Id = SectionId;

    fn id(&self) -> Self::Id {
        self.id
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}

impl Scoped for Section {
    type ParentId = SpaceId;

    const KIND: EntityKind = EntityKind::Section;

    fn parent_id(&self) -> Self::ParentId {
        self.space_id
    }

    fn set_parent_id(&mut self, parent: Self::ParentId) {
        self.space_id = parent;
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn set_label(&mut self, label: String) {
        self.name = label;
    }
}

impl Ordered for Resource {
    type Id = ResourceId;

    fn id(&self) -> Self::Id {
        self.id
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}

impl Scoped for Resource {
    type ParentId = SectionId;

    const KIND: EntityKind = EntityKind::Resource;

    fn parent_id(&self) -> Self::ParentId {
        self.section_id
    }

    fn set_parent_id(&mut self, parent: Self::ParentId) {
        self.section_id = parent;
    }

    fn label(&self) -> &str {
        &self.title
    }

    fn set_label(&mut self, label: String) {
        self.title = label;
    }
}

/// Field values for a resource that has not been persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResourceDraft {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub favicon_url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_google_drive: bool,
}

impl ResourceDraft {
    /// Validate the user-supplied fields of a saved link.
    ///
    /// # Errors
    /// Returns [`ShelfError::Validation`] when the title is blank or the URL is not absolute.
    pub fn validate(&self) -> Result<(), ShelfError> {
        validate_name("title", &self.title)?;
        validate_url(&self.url)?;
        if let Some(favicon_url) = &self.favicon_url {
            validate_url(favicon_url)?;
        }
        Ok(())
    }
}

/// Partial update of a resource; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResourcePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub favicon_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ResourcePatch {
    /// # Errors
    /// Returns [`ShelfError::Validation`] when a provided field is malformed.
    pub fn validate(&self) -> Result<(), ShelfError> {
        if let Some(title) = &self.title {
            validate_name("title", title)?;
        }
        if let Some(url) = &self.url {
            validate_url(url)?;
        }
        if let Some(favicon_url) = &self.favicon_url {
            validate_url(favicon_url)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.url.is_none()
            && self.favicon_url.is_none()
            && self.description.is_none()
    }

    /// Title and URL are stored trimmed, as on create.
    pub fn apply(&self, resource: &mut Resource) {
        if let Some(title) = &self.title {
            title.trim().clone_into(&mut resource.title);
        }
        if let Some(url) = &self.url {
            url.trim().clone_into(&mut resource.url);
        }
        if let Some(favicon_url) = &self.favicon_url {
            resource.favicon_url = Some(favicon_url.clone());
        }
        if let Some(description) = &self.description {
            resource.description = Some(description.clone());
        }
    }
}

/// # Errors
/// Returns [`ShelfError::Validation`] when `value` is blank or longer than 512 characters.
pub fn validate_name(field: &str, value: &str) -> Result<(), ShelfError> {
    if value.trim().is_empty() {
        return Err(ShelfError::Validation(format!("{field} MUST be non-empty")));
    }
    if value.chars().count() > 512 {
        return Err(ShelfError::Validation(format!("{field} MUST be at most 512 characters")));
    }
    Ok(())
}

/// # Errors
/// Returns [`ShelfError::Validation`] unless `value` carries a scheme followed by `:`.
pub fn validate_url(value: &str) -> Result<(), ShelfError> {
    let trimmed = value.trim();
    let Some((scheme, rest)) = trimmed.split_once(':') else {
        return Err(ShelfError::Validation(format!("url MUST be absolute: {value}")));
    };
    let scheme_ok = !scheme.is_empty()
        && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !scheme_ok || rest.is_empty() {
        return Err(ShelfError::Validation(format!("url MUST be absolute: {value}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(1_700_000_000)
    }

    fn fixture_user() -> UserId {
        match UserId::parse("ada@example.com") {
            Ok(user) => user,
            Err(err) => panic!("invalid fixture user: {err}"),
        }
    }

    // Test IDs: TCORE-001
    #[test]
    fn typed_ids_round_trip_through_display() -> Result<(), ShelfError> {
        let id = SectionId::new();
        let parsed: SectionId = id.to_string().parse()?;
        assert_eq!(parsed, id);
        Ok(())
    }

    // Test IDs: TCORE-002
    #[test]
    fn malformed_ids_are_validation_errors() {
        let err = "not-a-ulid".parse::<ResourceId>().err();
        assert!(matches!(err, Some(ShelfError::Validation(_))));
    }

    // Test IDs: TCORE-003
    #[test]
    fn user_id_rejects_blank_subjects() {
        assert!(UserId::parse("   ").is_err());
        assert_eq!(fixture_user().as_str(), "ada@example.com");
    }

    // Test IDs: TCORE-004
    #[test]
    fn user_id_deserialization_is_validated() {
        let parsed = serde_json::from_str::<UserId>("\"\"");
        assert!(parsed.is_err());
    }

    // Test IDs: TCORE-005
    #[test]
    fn error_kind_matches_variant() {
        assert_eq!(ShelfError::NotFound("x".to_string()).kind(), ErrorKind::NotFound);
        assert_eq!(ShelfError::Unauthorized("x".to_string()).kind(), ErrorKind::Unauthorized);
        assert_eq!(ShelfError::InvalidState("x".to_string()).kind(), ErrorKind::InvalidState);
        assert_eq!(
            ShelfError::TransientFailure("x".to_string()).kind().as_str(),
            "transient_failure"
        );
    }

    // Test IDs: TCORE-006
    #[test]
    fn resource_draft_validation_requires_title_and_absolute_url() {
        let mut draft = ResourceDraft {
            title: "Rust book".to_string(),
            url: "https://doc.rust-lang.org/book/".to_string(),
            favicon_url: None,
            mime_type: None,
            description: None,
            is_google_drive: false,
        };
        assert!(draft.validate().is_ok());

        draft.url = "doc.rust-lang.org/book".to_string();
        assert!(matches!(draft.validate(), Err(ShelfError::Validation(_))));

        draft.url = "chrome://extensions".to_string();
        draft.title = " ".to_string();
        assert!(matches!(draft.validate(), Err(ShelfError::Validation(_))));
    }

    // Test IDs: TCORE-007
    #[test]
    fn resource_patch_applies_only_present_fields() {
        let mut resource = Resource {
            id: ResourceId::new(),
            section_id: SectionId::new(),
            user_id: fixture_user(),
            title: "Old".to_string(),
            url: "https://old.example".to_string(),
            favicon_url: None,
            mime_type: None,
            description: Some("keep".to_string()),
            is_google_drive: false,
            order: 3,
            created_at: fixture_time(),
            updated_at: fixture_time(),
        };
        let patch = ResourcePatch { title: Some("New".to_string()), ..ResourcePatch::default() };
        assert!(!patch.is_empty());
        patch.apply(&mut resource);

        assert_eq!(resource.title, "New");
        assert_eq!(resource.url, "https://old.example");
        assert_eq!(resource.description.as_deref(), Some("keep"));
        assert_eq!(resource.order, 3);

        let padded = ResourcePatch {
            title: Some("  Docs \n".to_string()),
            url: Some(" https://docs.example/ ".to_string()),
            ..ResourcePatch::default()
        };
        padded.apply(&mut resource);
        assert_eq!(resource.title, "Docs");
        assert_eq!(resource.url, "https://docs.example/");
    }

    // Test IDs: TCORE-008
    #[test]
    fn entity_kinds_chain_to_their_parents() {
        assert_eq!(EntityKind::Resource.parent_kind(), Some(EntityKind::Section));
        assert_eq!(EntityKind::Section.parent_kind(), Some(EntityKind::Space));
        assert_eq!(EntityKind::Space.parent_kind(), Some(EntityKind::Workspace));
        assert_eq!(EntityKind::Workspace.parent_kind(), None);
        assert_eq!(EntityKind::parse("space"), Some(EntityKind::Space));
    }
}

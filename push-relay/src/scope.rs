//! Recipient scopes and the document paths they resolve to.

use docstore::{CollectionPath, DocumentPath, PathParams};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ADMINS: &str = "admins";
pub const ORGANIZATIONS: &str = "organizations";
pub const USERS: &str = "users";
pub const PROPERTIES: &str = "properties";
pub const RESIDENTS: &str = "residents";
pub const NOTIFICATIONS: &str = "notifications";

/// Whose profile (and token set) a notification targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RecipientScope {
    Admin {
        admin_id: String,
    },
    OrgUser {
        org_id: String,
        uid: String,
    },
    Resident {
        org_id: String,
        property_id: String,
        resident_id: String,
    },
}

impl RecipientScope {
    pub fn admin(admin_id: impl Into<String>) -> Self {
        Self::Admin {
            admin_id: admin_id.into(),
        }
    }

    pub fn org_user(org_id: impl Into<String>, uid: impl Into<String>) -> Self {
        Self::OrgUser {
            org_id: org_id.into(),
            uid: uid.into(),
        }
    }

    pub fn resident(
        org_id: impl Into<String>,
        property_id: impl Into<String>,
        resident_id: impl Into<String>,
    ) -> Self {
        Self::Resident {
            org_id: org_id.into(),
            property_id: property_id.into(),
            resident_id: resident_id.into(),
        }
    }

    /// Path of the recipient's profile document.
    pub fn resolve_path(&self) -> Result<DocumentPath> {
        let path = match self {
            Self::Admin { admin_id } => CollectionPath::root(ADMINS).doc(admin_id)?,
            Self::OrgUser { org_id, uid } => organization_path(org_id)?.collection(USERS).doc(uid)?,
            Self::Resident {
                org_id,
                property_id,
                resident_id,
            } => residents_collection(org_id, property_id)?.doc(resident_id)?,
        };
        Ok(path)
    }

    /// Collection holding this recipient's notification records.
    pub fn notifications_collection(&self) -> Result<CollectionPath> {
        Ok(self.resolve_path()?.collection(NOTIFICATIONS))
    }

    /// Build a scope from the parameters bound by a trigger path pattern.
    ///
    /// `adminId` selects an admin; `orgId` with `propertyId` and `residentId`
    /// selects a resident; `orgId` with `uid` selects an organization user.
    pub fn from_event_params(params: &PathParams) -> Result<Self> {
        let get = |key: &str| params.get(key).map(String::as_str);
        match (
            get("adminId"),
            get("orgId"),
            get("uid"),
            get("propertyId"),
            get("residentId"),
        ) {
            (Some(admin_id), None, None, None, None) => Ok(Self::admin(admin_id)),
            (None, Some(org_id), None, Some(property_id), Some(resident_id)) => {
                Ok(Self::resident(org_id, property_id, resident_id))
            }
            (None, Some(org_id), Some(uid), None, None) => Ok(Self::org_user(org_id, uid)),
            _ => Err(Error::validation(format!(
                "event parameters {:?} do not identify a recipient",
                params
            ))),
        }
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Admin { admin_id } => format!("admin:{}", admin_id),
            Self::OrgUser { org_id, uid } => format!("user:{}/{}", org_id, uid),
            Self::Resident {
                org_id,
                property_id,
                resident_id,
            } => format!("resident:{}/{}/{}", org_id, property_id, resident_id),
        }
    }
}

/// Free-function form of [`RecipientScope::resolve_path`].
pub fn resolve_path(scope: &RecipientScope) -> Result<DocumentPath> {
    scope.resolve_path()
}

/// Free-function form of [`RecipientScope::from_event_params`].
pub fn scope_from_event_params(params: &PathParams) -> Result<RecipientScope> {
    RecipientScope::from_event_params(params)
}

pub fn organization_path(org_id: &str) -> Result<DocumentPath> {
    Ok(CollectionPath::root(ORGANIZATIONS).doc(org_id)?)
}

pub fn property_path(org_id: &str, property_id: &str) -> Result<DocumentPath> {
    Ok(organization_path(org_id)?
        .collection(PROPERTIES)
        .doc(property_id)?)
}

pub fn residents_collection(org_id: &str, property_id: &str) -> Result<CollectionPath> {
    Ok(property_path(org_id, property_id)?.collection(RESIDENTS))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> PathParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_profile_paths() {
        assert_eq!(
            RecipientScope::admin("a1").resolve_path().unwrap().as_str(),
            "admins/a1"
        );
        assert_eq!(
            RecipientScope::org_user("o1", "u1")
                .resolve_path()
                .unwrap()
                .as_str(),
            "organizations/o1/users/u1"
        );
        assert_eq!(
            RecipientScope::resident("o1", "p1", "r1")
                .notifications_collection()
                .unwrap()
                .as_str(),
            "organizations/o1/properties/p1/residents/r1/notifications"
        );
    }

    #[test]
    fn scope_from_params() {
        let notification = ("notificationId", "n1");
        assert_eq!(
            scope_from_event_params(&params(&[("adminId", "a1"), notification])).unwrap(),
            RecipientScope::admin("a1")
        );
        assert_eq!(
            scope_from_event_params(&params(&[("orgId", "o1"), ("uid", "u1"), notification]))
                .unwrap(),
            RecipientScope::org_user("o1", "u1")
        );
        assert_eq!(
            scope_from_event_params(&params(&[
                ("orgId", "o1"),
                ("propertyId", "p1"),
                ("residentId", "r1"),
            ]))
            .unwrap(),
            RecipientScope::resident("o1", "p1", "r1")
        );
        assert!(scope_from_event_params(&params(&[("orgId", "o1")])).is_err());
        assert!(scope_from_event_params(&params(&[("orgId", "o1"), ("propertyId", "p1")])).is_err());
    }

    #[test]
    fn rejects_ids_with_slashes() {
        assert!(RecipientScope::admin("a/b").resolve_path().is_err());
    }

    #[test]
    fn wire_format() {
        let scope: RecipientScope = serde_json::from_str(
            r#"{"kind":"resident","orgId":"o1","propertyId":"p1","residentId":"r1"}"#,
        )
        .unwrap();
        assert_eq!(scope, RecipientScope::resident("o1", "p1", "r1"));

        let json = serde_json::to_value(RecipientScope::org_user("o1", "u1")).unwrap();
        assert_eq!(json["kind"], "org_user");
        assert_eq!(json["orgId"], "o1");
    }
}

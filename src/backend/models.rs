//! Wire types for the backend API.

use serde::{Deserialize, Serialize};

use crate::session::{CanonicalUser, EntityTypeRef};

/// Body for `POST /auth/login-sync`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginSyncRequest {
    /// Provider uid of the signed-in identity.
    pub uid: String,
}

/// Body for `POST /auth/register-sync`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterSyncRequest {
    /// Display name collected at registration.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Provider uid of the freshly created identity.
    pub uid: String,
}

/// Canonical user payload as the backend sends it.
///
/// The wire shape nests the display name and entity types inside an
/// `entity` object and calls the id `user_id`; [`into_canonical`] flattens
/// it into the crate-native [`CanonicalUser`].
///
/// [`into_canonical`]: UserPayload::into_canonical
#[derive(Debug, Deserialize)]
pub(crate) struct UserPayload {
    pub user_id: i64,
    pub email: String,
    #[serde(default)]
    pub entity: Option<EntityPayload>,
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
    #[serde(default)]
    pub profile_complete: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntityPayload {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: Vec<EntityTypeRef>,
}

impl UserPayload {
    pub fn into_canonical(self) -> CanonicalUser {
        let (name, entity_type) = match self.entity {
            Some(entity) => (entity.name, entity.entity_type),
            None => (String::new(), Vec::new()),
        };
        CanonicalUser {
            id: self.user_id,
            email: self.email,
            name,
            entity_type,
            profile: self.profile,
            profile_complete: self.profile_complete,
        }
    }
}

/// Entry in the `/entity-types` and `/service-types` reference tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub id: i64,
    #[serde(alias = "name")]
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_payload_flattens_entity() {
        let payload: UserPayload = serde_json::from_value(serde_json::json!({
            "user_id": 7,
            "email": "a@b.com",
            "entity": { "name": "Ann", "type": ["owner"] },
            "profile": null
        }))
        .unwrap();

        let user = payload.into_canonical();
        assert_eq!(user.id, 7);
        assert_eq!(user.email, "a@b.com");
        assert_eq!(user.name, "Ann");
        assert_eq!(user.entity_type, vec![EntityTypeRef::from_code("owner")]);
        assert!(user.profile.is_none());
        assert!(!user.profile_complete);
    }

    #[test]
    fn test_user_payload_without_entity() {
        let payload: UserPayload = serde_json::from_value(serde_json::json!({
            "user_id": 3,
            "email": "x@y.com",
            "profile_complete": true
        }))
        .unwrap();

        let user = payload.into_canonical();
        assert_eq!(user.id, 3);
        assert_eq!(user.name, "");
        assert!(user.entity_type.is_empty());
        assert!(user.profile_complete);
    }

    #[test]
    fn test_user_payload_entity_type_objects() {
        let payload: UserPayload = serde_json::from_value(serde_json::json!({
            "user_id": 9,
            "email": "v@y.com",
            "entity": {
                "name": "Clinic",
                "type": [{ "id": 2, "code": "veterinarian" }, "shelter"]
            }
        }))
        .unwrap();

        let user = payload.into_canonical();
        assert_eq!(user.entity_type.len(), 2);
        assert_eq!(user.entity_type[0].id, Some(2));
        assert_eq!(user.entity_type[0].code, "veterinarian");
        assert_eq!(user.entity_type[1], EntityTypeRef::from_code("shelter"));
    }

    #[test]
    fn test_reference_item_accepts_name_alias() {
        let item: ReferenceItem = serde_json::from_str(r#"{"id": 1, "name": "grooming"}"#).unwrap();
        assert_eq!(item.code, "grooming");

        let item: ReferenceItem = serde_json::from_str(r#"{"id": 2, "code": "boarding"}"#).unwrap();
        assert_eq!(item.code, "boarding");
    }

    #[test]
    fn test_sync_request_bodies() {
        let login = serde_json::to_value(&LoginSyncRequest {
            uid: "uid-7".to_string(),
        })
        .unwrap();
        assert_eq!(login, serde_json::json!({ "uid": "uid-7" }));

        let register = serde_json::to_value(&RegisterSyncRequest {
            name: "Ann".to_string(),
            email: "a@b.com".to_string(),
            uid: "uid-7".to_string(),
        })
        .unwrap();
        assert_eq!(
            register,
            serde_json::json!({ "name": "Ann", "email": "a@b.com", "uid": "uid-7" })
        );
    }
}

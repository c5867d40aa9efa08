//! Device-token registry stored on recipient profiles.
//!
//! Tokens are only ever added with an array union and removed with an array
//! remove, both applied inside the store's write lock. A registration racing a
//! prune therefore never loses either change.

use docstore::{DocumentStore, Updates};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{FCM_TOKENS_FIELD, RecipientProfile};
use crate::scope::RecipientScope;

/// Tokens of the recipient, or `None` when the profile does not exist.
pub async fn load_tokens(
    store: &dyn DocumentStore,
    scope: &RecipientScope,
) -> Result<Option<Vec<String>>> {
    let path = scope.resolve_path()?;
    let Some(profile) = store.get(&path).await? else {
        return Ok(None);
    };
    Ok(Some(RecipientProfile::tokens_from_fields(&profile.fields)))
}

/// Add a token to the recipient's set.
pub async fn register_token(
    store: &dyn DocumentStore,
    scope: &RecipientScope,
    token: &str,
) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::validation("token must not be blank"));
    }
    let path = scope.resolve_path()?;
    store
        .update(&path, Updates::new().array_union(FCM_TOKENS_FIELD, [token]))
        .await
        .map_err(|e| match e {
            e if e.is_not_found() => Error::not_found("Recipient", scope.describe()),
            e => e.into(),
        })?;
    info!(recipient = %scope.describe(), "Registered device token");
    Ok(())
}

/// Remove a token from the recipient's set.
pub async fn unregister_token(
    store: &dyn DocumentStore,
    scope: &RecipientScope,
    token: &str,
) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::validation("token must not be blank"));
    }
    let path = scope.resolve_path()?;
    store
        .update(&path, Updates::new().array_remove(FCM_TOKENS_FIELD, [token]))
        .await
        .map_err(|e| match e {
            e if e.is_not_found() => Error::not_found("Recipient", scope.describe()),
            e => e.into(),
        })?;
    info!(recipient = %scope.describe(), "Unregistered device token");
    Ok(())
}

/// Remove tokens reported as permanently undeliverable.
///
/// A profile deleted in the meantime has nothing left to prune.
pub async fn prune_tokens(
    store: &dyn DocumentStore,
    scope: &RecipientScope,
    tokens: &[String],
) -> Result<()> {
    if tokens.is_empty() {
        return Ok(());
    }
    let path = scope.resolve_path()?;
    match store
        .update(
            &path,
            Updates::new().array_remove(FCM_TOKENS_FIELD, tokens.iter().map(String::as_str)),
        )
        .await
    {
        Ok(()) => {
            info!(
                recipient = %scope.describe(),
                count = tokens.len(),
                "Pruned invalid device tokens"
            );
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(recipient = %scope.describe(), "Profile gone before pruning");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore::{Fields, MemoryStore};
    use serde_json::{Value, json};

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    async fn store_with_resident(tokens: Value) -> (MemoryStore, RecipientScope) {
        let store = MemoryStore::new();
        let scope = RecipientScope::resident("o1", "p1", "r1");
        store
            .set(
                &scope.resolve_path().unwrap(),
                fields(json!({ "displayName": "Rae", "fcmTokens": tokens })),
                false,
            )
            .await
            .unwrap();
        (store, scope)
    }

    #[tokio::test]
    async fn missing_profile_has_no_tokens() {
        let store = MemoryStore::new();
        let scope = RecipientScope::admin("nobody");
        assert_eq!(load_tokens(&store, &scope).await.unwrap(), None);
    }

    #[tokio::test]
    async fn register_is_a_union() {
        let (store, scope) = store_with_resident(json!(["a"])).await;
        register_token(&store, &scope, "b").await.unwrap();
        register_token(&store, &scope, "a").await.unwrap();
        assert_eq!(
            load_tokens(&store, &scope).await.unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[tokio::test]
    async fn register_rejects_blank_and_missing_profiles() {
        let (store, scope) = store_with_resident(json!([])).await;
        assert!(matches!(
            register_token(&store, &scope, "  ").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            register_token(&store, &RecipientScope::admin("ghost"), "t").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn prune_removes_only_named_tokens() {
        let (store, scope) = store_with_resident(json!(["A", "B", "C"])).await;
        prune_tokens(&store, &scope, &["B".to_string()]).await.unwrap();
        assert_eq!(
            load_tokens(&store, &scope).await.unwrap(),
            Some(vec!["A".to_string(), "C".to_string()])
        );
    }

    #[tokio::test]
    async fn prune_tolerates_deleted_profile() {
        let store = MemoryStore::new();
        let scope = RecipientScope::org_user("o1", "gone");
        prune_tokens(&store, &scope, &["x".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn unregister_removes_token() {
        let (store, scope) = store_with_resident(json!(["A", "B"])).await;
        unregister_token(&store, &scope, "A").await.unwrap();
        assert_eq!(
            load_tokens(&store, &scope).await.unwrap(),
            Some(vec!["B".to_string()])
        );
    }
}

use axum::response::Json;

use crate::auth::scopes::DECLARED_SCOPES;

/// Scopes with a meaning to the gateway. Needs no credentials.
#[tracing::instrument(skip_all)]
pub async fn list_scopes() -> Json<Vec<&'static str>> {
    Json(DECLARED_SCOPES.to_vec())
}

#[cfg(test)]
mod tests {
    use crate::test_utils::create_test_app;

    #[test_log::test(tokio::test)]
    async fn test_scopes_are_public() {
        let app = create_test_app().await;

        let response = app.server.get("/_/scopes").await;

        response.assert_status_ok();
        let scopes: Vec<String> = response.json();
        assert_eq!(scopes, ["adm", "adm.accesskey", "adm.accesskey.read", "adm.read"]);
    }
}

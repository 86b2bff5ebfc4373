//! Per-request security context and its extractor.

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use std::{collections::BTreeSet, convert::Infallible};
use tracing::trace;

use crate::errors::{Error, Result};

/// Who the current request is acting as.
///
/// The dispatcher fills the context and then seals it before the request reaches a route
/// handler. A sealed context rejects every further mutation, so a handler cannot change the
/// identity it was authenticated as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    subject: Option<String>,
    scopes: BTreeSet<String>,
    sealed: bool,
}

impl SecurityContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for `subject`, sealed.
    pub fn authenticated(subject: impl Into<String>, scopes: BTreeSet<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            scopes,
            sealed: true,
        }
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) -> Result<()> {
        self.ensure_unsealed()?;
        self.subject = Some(subject.into());
        Ok(())
    }

    pub fn set_scopes(&mut self, scopes: BTreeSet<String>) -> Result<()> {
        self.ensure_unsealed()?;
        self.scopes = scopes;
        Ok(())
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject.is_some()
    }

    /// Whether the context holds at least one of `required`. An empty requirement only asks
    /// for an authenticated caller.
    pub fn scopes_include_one_of(&self, required: &[&str]) -> bool {
        if required.is_empty() {
            return self.is_authenticated();
        }
        required.iter().any(|scope| self.scopes.contains(*scope))
    }

    fn ensure_unsealed(&self) -> Result<()> {
        if self.sealed {
            return Err(Error::Internal {
                operation: "modify a sealed security context".to_string(),
            });
        }
        Ok(())
    }
}

impl<S> FromRequestParts<S> for SecurityContext
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        match parts.extensions.get::<SecurityContext>() {
            Some(context) if context.is_authenticated() => Ok(context.clone()),
            _ => {
                trace!("No authenticated security context on request");
                Err(Error::Unauthenticated { message: None })
            }
        }
    }
}

impl<S> OptionalFromRequestParts<S> for SecurityContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Option<Self>, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<SecurityContext>()
            .filter(|context| context.is_authenticated())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn scopes(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sealed_context_rejects_mutation() {
        let mut context = SecurityContext::new();
        context.set_subject("alice").unwrap();
        context.set_scopes(scopes(&["read"])).unwrap();
        context.seal();

        assert!(context.set_subject("mallory").is_err());
        assert!(context.set_scopes(scopes(&["admin"])).is_err());
        assert_eq!(context.subject(), Some("alice"));
        assert_eq!(context.scopes(), &scopes(&["read"]));
    }

    #[test]
    fn test_scopes_include_one_of() {
        let context = SecurityContext::authenticated("alice", scopes(&["read", "write"]));

        assert!(context.scopes_include_one_of(&["write"]));
        assert!(context.scopes_include_one_of(&["admin", "read"]));
        assert!(!context.scopes_include_one_of(&["admin"]));
        assert!(context.scopes_include_one_of(&[]));

        assert!(!SecurityContext::new().scopes_include_one_of(&[]));
    }

    #[tokio::test]
    async fn test_extractor() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();

        let missing = <SecurityContext as FromRequestParts<()>>::from_request_parts(&mut parts, &()).await;
        assert!(matches!(missing, Err(Error::Unauthenticated { .. })));

        let optional = <SecurityContext as OptionalFromRequestParts<()>>::from_request_parts(&mut parts, &()).await;
        assert_eq!(optional.unwrap(), None);

        parts.extensions.insert(SecurityContext::authenticated("alice", BTreeSet::new()));
        let context = <SecurityContext as FromRequestParts<()>>::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(context.subject(), Some("alice"));
        assert!(context.is_sealed());
    }
}

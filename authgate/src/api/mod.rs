//! HTTP surface of the gateway.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request and response bodies
//!
//! # Routes
//!
//! - `POST /api/v1/login/_login`: password login, sets the session cookie
//! - `POST /api/v1/login/_logout`: clears session credentials
//! - `GET /api/v1/userinfo`: the authenticated subject and its scopes
//! - `GET /oauth2/authorize`: authorization code grant, first leg
//! - `POST /oauth2/token`: exchanges an authorization code for a temporary access token
//! - `GET /_/scopes`: scopes that unlock the administrative routes (public)
//! - `GET|POST /api/v1/accesskeys`: list or create access keys
//! - `GET|DELETE /api/v1/accesskeys/{key_id}`: inspect or remove a key
//! - `PUT /api/v1/accesskeys/{key_id}/description`: replace a key's description
//! - `POST /api/v1/accesskeys/{key_id}/_renew`: reissue a key under a new id
//! - `POST /api/v1/accesskeys/_validate`: find the key a token belongs to
//! - `POST /api/v1/accesskeys/_restore`: recreate the key row of an issued token
//! - `GET /api/v1/audit/logins`: recorded login attempts
//!
//! Credentials are checked by [`crate::auth::middleware`] before any handler runs; handlers
//! only read the resulting [`SecurityContext`](crate::auth::current_user::SecurityContext).

pub mod handlers;
pub mod models;

//! OAuth credential management.
//!
//! This module owns the persisted Gmail credential: loading it at startup,
//! refreshing the access token when it nears expiry, and running the
//! interactive browser-based authorization flow when no usable credential
//! exists. The credential file is overwritten wholesale after every
//! successful refresh or authorization.

mod credential;
mod flow;

pub use credential::{AuthError, ClientSecretFile, Credential, CredentialStore, InstalledApp};

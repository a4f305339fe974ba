//! Google Drive and Sheets transports for HealthSync.
//!
//! This module provides the remote document backends with:
//! - Access tokens refreshed once per batch and passed by value
//! - Drive search, multipart create, media update and download
//! - Sheets value reads and block writes in A1 notation
//! - PDF rendering of spreadsheets through Drive export

pub mod auth;
pub mod client;
pub mod provider;
pub mod sheets;

pub use auth::{
    AccessToken, OAuthClientConfig, RefreshingTokenSource, StaticTokenSource, TokenSource, Tokens,
};
pub use client::{escape_query_value, DriveClient, GoogleEndpoints};
pub use provider::GoogleAdapters;
pub use sheets::SheetsClient;

//! Re-publishes the Google Cloud security bulletin Atom feed with each entry's
//! `updated` taken from the publish date written in its body.
//!
//! - [`feed`] - model, XML codec, date extraction and reformatting
//! - [`pipeline`] - one fetch → parse → reformat → serialize pass
//! - [`server`] - axum router exposing the feed
//! - [`config`] - runtime settings

pub mod config;
pub mod feed;
pub mod pipeline;
pub mod server;

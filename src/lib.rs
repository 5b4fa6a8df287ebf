//! Reconciles enrollment, grade and progress exports of a learning platform
//! into one validated student roster.
//!
//! [`pipeline::process`] is the entry point: it parses the three uploads,
//! validates every row, joins the accepted rows on the student's key and
//! returns the valid students together with the rejected rows of each source.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod identity;
pub mod merge;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod store;
pub mod validate;

pub mod bundler;
pub mod cli;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod fmt;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod reconciler;
pub mod roster;
pub mod scanner;
pub mod settings;

pub mod approval;
pub mod card;
pub mod collect;
pub mod config;
pub mod context;
pub mod git;
pub mod github;
pub mod ledger;
pub mod metadata;
pub mod model;
pub mod publish;
pub mod social;
pub mod store;
pub mod text;

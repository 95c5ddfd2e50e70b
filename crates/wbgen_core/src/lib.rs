pub mod checkpoint;
pub mod config;
pub mod eligibility;
pub mod entity;
pub mod fetch;
pub mod generation;
pub mod labels;
pub mod mediawiki;
pub mod prompt;
pub mod publish;
pub mod source;
pub mod statements;

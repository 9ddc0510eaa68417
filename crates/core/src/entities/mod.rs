//! Versioned planning entities: projects, roadmaps, milestones, features and
//! branch-protection rules.

pub mod domain;
pub mod repository;

mod repo_branch_rule;
mod repo_feature;
mod repo_milestone;
pub(crate) mod repo_project;
mod repo_roadmap;

#[cfg(test)]
mod repo_tests;

pub use domain::*;
pub use repository::*;

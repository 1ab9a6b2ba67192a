// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker roles and the keyword-based role assigner.
//!
//! Roles are advisory metadata attached to prompts; they never restrict what
//! a worker may do. Assignment is a pure function over a fixed keyword table,
//! so a given task text always maps to the same role.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of worker specializations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Analyst,
    DataScientist,
    ItArchitect,
    Developer,
    Generic,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Analyst => "analyst",
            Role::DataScientist => "data-scientist",
            Role::ItArchitect => "it-architect",
            Role::Developer => "developer",
            Role::Generic => "generic",
        }
    }

    /// System-prompt perspective prefixed to subtask prompts.
    pub fn perspective(&self) -> &'static str {
        match self {
            Role::Analyst => {
                "You are an analyst. Examine the problem, weigh the evidence, \
                 and answer with clear findings and recommendations."
            }
            Role::DataScientist => {
                "You are a data scientist. Reason about data, models and \
                 statistics, and show the steps behind any numbers you produce."
            }
            Role::ItArchitect => {
                "You are an IT architect. Think in systems, interfaces and \
                 trade-offs, and describe designs precisely."
            }
            Role::Developer => {
                "You are a software developer. Produce working, idiomatic code \
                 with brief notes on usage."
            }
            Role::Generic => "You are a capable general-purpose assistant.",
        }
    }

    /// All roles, in tie-break priority order (highest first).
    pub fn all() -> [Role; 5] {
        [
            Role::Developer,
            Role::ItArchitect,
            Role::DataScientist,
            Role::Analyst,
            Role::Generic,
        ]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyst" => Ok(Role::Analyst),
            "data-scientist" => Ok(Role::DataScientist),
            "it-architect" => Ok(Role::ItArchitect),
            "developer" => Ok(Role::Developer),
            "generic" => Ok(Role::Generic),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

// Keyword buckets. Matching is substring-based over the lowercased text,
// so stems ("summar", "scalab") catch their inflections.
const DEVELOPER_KEYWORDS: &[&str] = &[
    "code", "implement", "function", "script", "program", "compile", "debug", "bug", "fix",
    "refactor", "api", "endpoint", "class", "library", "unit test", "write a test",
];

const IT_ARCHITECT_KEYWORDS: &[&str] = &[
    "architecture", "infrastructure", "deploy", "integration", "scalab", "network", "docker",
    "kubernetes", "cloud", "security", "topology", "system design", "microservice",
];

const DATA_SCIENTIST_KEYWORDS: &[&str] = &[
    "data", "dataset", "model", "train", "predict", "statistic", "machine learning", "regression",
    "cluster", "feature", "pandas", "notebook",
];

const ANALYST_KEYWORDS: &[&str] = &[
    "analyze", "analysis", "report", "summar", "metric", "trend", "insight", "review", "compare",
    "evaluate", "research", "document",
];

/// Buckets in tie-break priority order.
const BUCKETS: &[(Role, &[&str])] = &[
    (Role::Developer, DEVELOPER_KEYWORDS),
    (Role::ItArchitect, IT_ARCHITECT_KEYWORDS),
    (Role::DataScientist, DATA_SCIENTIST_KEYWORDS),
    (Role::Analyst, ANALYST_KEYWORDS),
];

/// Map a task text to the best-fitting role.
///
/// The highest-scoring bucket wins; ties (including the all-zero case) fall
/// through to the earlier bucket in [`BUCKETS`], with `generic` as the floor.
pub fn role_of(text: &str) -> Role {
    let lower = text.to_lowercase();

    let mut best = Role::Generic;
    let mut best_score = 0usize;
    for (role, words) in BUCKETS {
        let score = words.iter().filter(|w| lower.contains(*w)).count();
        if score > best_score {
            best = *role;
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
#[path = "role_tests.rs"]
mod tests;

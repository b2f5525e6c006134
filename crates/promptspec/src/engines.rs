//! Known execution strategies.
//!
//! Engines that run these strategies live outside this crate. The table
//! only records what each one expects from the compiled output, so a
//! document can be checked before it is handed over.

use std::collections::BTreeMap;

/// One execution strategy and the named prompts it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub name: &'static str,
    pub required_prompts: &'static [&'static str],
    pub summary: &'static str,
}

pub static STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "single-call",
        required_prompts: &[],
        summary: "one call with the composed prompt",
    },
    Strategy {
        name: "self-consistency",
        required_prompts: &[],
        summary: "sample several answers and aggregate them",
    },
    Strategy {
        name: "tree-of-thought",
        required_prompts: &["generate", "evaluate", "synthesize"],
        summary: "generate branches, score them, synthesize the best",
    },
    Strategy {
        name: "reflection",
        required_prompts: &["generate", "critique", "revise"],
        summary: "draft, critique and revise in a loop",
    },
    Strategy {
        name: "collaborative",
        required_prompts: &["generate", "continue"],
        summary: "alternate model drafts with human edits",
    },
];

pub fn lookup(name: &str) -> Option<&'static Strategy> {
    STRATEGIES.iter().find(|s| s.name == name)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    STRATEGIES.iter().map(|s| s.name)
}

/// Warnings for each prompt `strategy` needs that `prompts` lacks.
pub fn missing_prompts(strategy: &str, prompts: &BTreeMap<String, String>) -> Vec<String> {
    let Some(s) = lookup(strategy) else {
        return Vec::new();
    };
    s.required_prompts
        .iter()
        .filter(|name| !prompts.contains_key(**name))
        .map(|name| {
            format!("execution strategy '{strategy}' expects a '@prompt {name}' block, but none was declared")
        })
        .collect()
}

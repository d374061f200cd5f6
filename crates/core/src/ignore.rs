//! Gitignore-style rule composition: project `.gitignore` + `.pommelignore` +
//! config patterns + a built-in rule that always ignores the project's
//! hidden state directory.

use crate::pattern;
use crate::Result;
use crate::PommelError;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the hidden directory the daemon keeps its PID file and state
/// manifest under. Always ignored, regardless of any other rule.
pub const STATE_DIR_NAME: &str = ".pommel";

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    negate: bool,
    dir_only: bool,
}

#[derive(Debug)]
pub struct Ignorer {
    rules: Vec<Rule>,
}

impl Ignorer {
    /// Builds the rule set in precedence order: `.gitignore`, `.pommelignore`,
    /// `config_patterns`, then the built-in state-directory rule (always
    /// last, so nothing can override it).
    pub fn new(project_root: &Path, config_patterns: &[String]) -> Result<Self> {
        if !project_root.is_dir() {
            return Err(PommelError::ProjectRootNotDirectory(project_root.to_path_buf()));
        }

        let mut rules = Vec::new();
        rules.extend(load_rule_file(&project_root.join(".gitignore")));
        rules.extend(load_rule_file(&project_root.join(".pommelignore")));
        rules.extend(config_patterns.iter().filter_map(|l| parse_line(l)));
        rules.push(Rule { pattern: STATE_DIR_NAME.to_string(), negate: false, dir_only: true });

        Ok(Self { rules })
    }

    /// Final verdict is the last rule that matched, with negation flipping it.
    pub fn should_ignore(&self, path: &Path) -> bool {
        let rel = normalize_rel(path);
        let mut ignored = false;
        for rule in &self.rules {
            if rule_matches(rule, &rel) {
                ignored = !rule.negate;
            }
        }
        ignored
    }
}

fn normalize_rel(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn load_rule_file(path: &PathBuf) -> Vec<Rule> {
    match fs::read_to_string(path) {
        Ok(content) => content.lines().filter_map(parse_line).collect(),
        Err(_) => Vec::new(),
    }
}

fn parse_line(line: &str) -> Option<Rule> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (negate, rest) = match trimmed.strip_prefix('!') {
        Some(r) => (true, r),
        None => (false, trimmed),
    };
    let (dir_only, rest) = match rest.strip_suffix('/') {
        Some(r) => (true, r),
        None => (false, rest),
    };
    if rest.is_empty() {
        return None;
    }
    Some(Rule { pattern: rest.to_string(), negate, dir_only })
}

/// A rule without an interior `/` matches at any depth (gitignore's
/// "basename" rule); one with an interior `/` is rooted at the project root.
fn is_rooted(pattern: &str) -> bool {
    pattern.contains('/')
}

fn glob_for(pattern: &str) -> String {
    if is_rooted(pattern) {
        pattern.to_string()
    } else {
        format!("**/{pattern}")
    }
}

fn rule_matches(rule: &Rule, rel_path: &str) -> bool {
    let glob = glob_for(&rule.pattern);
    if !rule.dir_only {
        return pattern::matches(&glob, rel_path);
    }
    // Directory-only: match if any ancestor of the path equals the rule
    // (including the path itself, which covers the directory-being-walked
    // case as well as a file directly inside it).
    let segs: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
    (1..=segs.len()).any(|n| pattern::matches(&glob, &segs[..n].join("/")))
}

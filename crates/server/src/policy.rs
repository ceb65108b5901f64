// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability levels, risk classification, and policy templates.
//!
//! Classification is a pure function of the command text so that the same
//! command always lands in the same risk bucket; the decision is evaluated
//! once to gate queueing and once to tag the approval request.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::storage::{map_constraint, open_db, open_memory_db, StoreError};

// -- Capability & risk --------------------------------------------------------

/// A probe's maximum permitted command class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityLevel {
    Observe,
    Diagnose,
    Remediate,
    Admin,
}

impl CapabilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Diagnose => "diagnose",
            Self::Remediate => "remediate",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "observe" => Some(Self::Observe),
            "diagnose" => Some(Self::Diagnose),
            "remediate" => Some(Self::Remediate),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        *self as u8
    }
}

/// Static classification of a command's danger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    fn rank(&self) -> u8 {
        *self as u8
    }

    /// A risk is covered when the probe's capability rank meets or exceeds it.
    pub fn within(&self, level: CapabilityLevel) -> bool {
        self.rank() <= level.rank()
    }
}

/// Commands that destroy data or hosts.
const CRITICAL_MARKERS: &[&str] =
    &["rm -rf /", "mkfs", "dd if=", "wipefs", "shred", "fdisk", "> /dev/sd"];

/// Commands that disrupt running services or accounts.
const HIGH_PREFIXES: &[&str] = &[
    "systemctl restart",
    "systemctl stop",
    "service ",
    "reboot",
    "shutdown",
    "kill ",
    "killall",
    "pkill",
    "iptables",
    "userdel",
    "usermod",
    "passwd",
];

/// Commands that mutate host state without disrupting it.
const MEDIUM_PREFIXES: &[&str] = &[
    "apt install",
    "apt-get install",
    "yum install",
    "dnf install",
    "pip install",
    "npm install",
    "chmod",
    "chown",
    "sed -i",
    "mv ",
    "cp ",
    "rm ",
    "mkdir",
    "touch",
    "systemctl start",
    "systemctl enable",
];

/// Read-only commands.
const LOW_PROGRAMS: &[&str] = &[
    "ls", "cat", "ps", "df", "du", "free", "uptime", "whoami", "hostname", "uname", "id", "env",
    "date", "top", "netstat", "ss", "ip", "dig", "ping", "tail", "head", "grep", "find", "stat",
    "journalctl", "dmesg", "which", "lsof",
];

/// Classify a command's risk. Deterministic; args are folded into the text.
pub fn classify_risk(command: &str, args: &[String]) -> RiskLevel {
    let mut text = command.trim().to_owned();
    for arg in args {
        text.push(' ');
        text.push_str(arg);
    }

    if CRITICAL_MARKERS.iter().any(|m| text.contains(m)) {
        return RiskLevel::Critical;
    }
    if HIGH_PREFIXES.iter().any(|p| text.starts_with(p)) {
        return RiskLevel::High;
    }
    if MEDIUM_PREFIXES.iter().any(|p| text.starts_with(p)) {
        return RiskLevel::Medium;
    }
    let program = text.split_whitespace().next().unwrap_or("");
    if LOW_PROGRAMS.contains(&program) {
        return RiskLevel::Low;
    }
    RiskLevel::Medium
}

// -- Policy evaluation --------------------------------------------------------

/// Outcome of evaluating a command against a probe's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyOutcome {
    Allow,
    Queue,
    Deny,
}

/// Machine-readable explanation attached to audit detail and API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub outcome: PolicyOutcome,
    pub risk_level: RiskLevel,
    pub rationale: String,
}

/// A named, reusable policy pushed to probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub level: CapabilityLevel,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

/// Whether a policy list entry matches a command. An entry matches when it
/// equals the program name (first token) or is a prefix of the full text.
fn entry_matches(entry: &str, command: &str) -> bool {
    let program = command.split_whitespace().next().unwrap_or("");
    entry == program || command.starts_with(entry)
}

/// Evaluate a command against a probe's capability level and active template.
pub fn evaluate(
    command: &str,
    args: &[String],
    level: CapabilityLevel,
    template: Option<&PolicyTemplate>,
) -> PolicyDecision {
    let risk = classify_risk(command, args);
    let mut text = command.trim().to_owned();
    for arg in args {
        text.push(' ');
        text.push_str(arg);
    }

    if let Some(tpl) = template {
        if tpl.blocked_commands.iter().any(|b| entry_matches(b, &text)) {
            return PolicyDecision {
                outcome: PolicyOutcome::Deny,
                risk_level: risk,
                rationale: "command is in the blocked list".to_owned(),
            };
        }
        if !tpl.allowed_commands.is_empty()
            && !tpl.allowed_commands.iter().any(|a| entry_matches(a, &text))
        {
            return PolicyDecision {
                outcome: PolicyOutcome::Deny,
                risk_level: risk,
                rationale: "command is not in the allowed list".to_owned(),
            };
        }
    }

    if risk.within(level) {
        PolicyDecision {
            outcome: PolicyOutcome::Allow,
            risk_level: risk,
            rationale: format!("{} risk within {} capability", risk.as_str(), level.as_str()),
        }
    } else {
        PolicyDecision {
            outcome: PolicyOutcome::Queue,
            risk_level: risk,
            rationale: format!("{} risk exceeds {} capability", risk.as_str(), level.as_str()),
        }
    }
}

// -- Template store -----------------------------------------------------------

/// Durable store for policy templates (`policy.db`).
pub struct PolicyStore {
    db: Mutex<Connection>,
}

impl PolicyStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::init(open_db(dir, "policy.db")?)
    }

    pub fn open_ephemeral() -> Result<Self, StoreError> {
        Self::init(open_memory_db()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS policy_templates (
                 id               TEXT PRIMARY KEY,
                 name             TEXT NOT NULL UNIQUE,
                 description      TEXT NOT NULL DEFAULT '',
                 level            TEXT NOT NULL,
                 allowed_commands TEXT NOT NULL DEFAULT '[]',
                 blocked_commands TEXT NOT NULL DEFAULT '[]',
                 allowed_paths    TEXT NOT NULL DEFAULT '[]'
             );",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn create(&self, tpl: &PolicyTemplate) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.execute(
            "INSERT INTO policy_templates
             (id, name, description, level, allowed_commands, blocked_commands, allowed_paths)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tpl.id,
                tpl.name,
                tpl.description,
                tpl.level.as_str(),
                serde_json::to_string(&tpl.allowed_commands).unwrap_or_default(),
                serde_json::to_string(&tpl.blocked_commands).unwrap_or_default(),
                serde_json::to_string(&tpl.allowed_paths).unwrap_or_default(),
            ],
        )
        .map_err(|e| map_constraint(e, "policy name"))?;
        Ok(())
    }

    pub fn update(&self, tpl: &PolicyTemplate) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let n = db.execute(
            "UPDATE policy_templates
             SET name = ?2, description = ?3, level = ?4,
                 allowed_commands = ?5, blocked_commands = ?6, allowed_paths = ?7
             WHERE id = ?1",
            params![
                tpl.id,
                tpl.name,
                tpl.description,
                tpl.level.as_str(),
                serde_json::to_string(&tpl.allowed_commands).unwrap_or_default(),
                serde_json::to_string(&tpl.blocked_commands).unwrap_or_default(),
                serde_json::to_string(&tpl.allowed_paths).unwrap_or_default(),
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<PolicyTemplate, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.query_row("SELECT * FROM policy_templates WHERE id = ?1", [id], row_to_template)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list(&self) -> Result<Vec<PolicyTemplate>, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let mut stmt = db.prepare("SELECT * FROM policy_templates ORDER BY name")?;
        let rows = stmt.query_map([], row_to_template)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let n = db.execute("DELETE FROM policy_templates WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<PolicyTemplate> {
    let level: String = row.get(3)?;
    let allowed: String = row.get(4)?;
    let blocked: String = row.get(5)?;
    let paths: String = row.get(6)?;
    Ok(PolicyTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        level: CapabilityLevel::parse(&level).unwrap_or(CapabilityLevel::Observe),
        allowed_commands: serde_json::from_str(&allowed).unwrap_or_default(),
        blocked_commands: serde_json::from_str(&blocked).unwrap_or_default(),
        allowed_paths: serde_json::from_str(&paths).unwrap_or_default(),
    })
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;

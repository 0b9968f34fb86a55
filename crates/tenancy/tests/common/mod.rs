//! Test infrastructure for the tenancy crate.
//!
//! [`FakeServer`] stands in for a MySQL-compatible server: it keeps a set of
//! database names, understands the handful of administrative statements the
//! server adapter issues, and records every connection and statement so tests
//! can assert on them.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use helios_tenancy::{
    AdminConnectOptions, AdminConnection, AdminConnector, BackendError, DatabaseTemplate, Row,
    TenancyResult,
};

// ============================================================================
// Fake Server
// ============================================================================

/// Failure the fake server injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The server host does not resolve; `connect` fails.
    UnknownServer,
    /// Every statement fails with "no such database".
    UnknownDatabase,
    /// Every statement fails with a generic query error.
    QueryRejected,
}

#[derive(Debug, Default)]
struct ServerState {
    databases: BTreeSet<String>,
    statements: Vec<String>,
    connections: Vec<AdminConnectOptions>,
    closed: usize,
    failure: Option<Failure>,
}

/// In-memory administrative server shared between connector and test.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server that already hosts `databases`.
    pub fn with_databases<'a>(databases: impl IntoIterator<Item = &'a str>) -> Self {
        let server = Self::new();
        server
            .state
            .lock()
            .databases
            .extend(databases.into_iter().map(str::to_string));
        server
    }

    /// Makes every following connection fail with `failure`.
    pub fn fail_with(&self, failure: Failure) {
        self.state.lock().failure = Some(failure);
    }

    pub fn databases(&self) -> BTreeSet<String> {
        self.state.lock().databases.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    pub fn connections(&self) -> Vec<AdminConnectOptions> {
        self.state.lock().connections.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn closed_count(&self) -> usize {
        self.state.lock().closed
    }

    pub fn connector(&self) -> Arc<dyn AdminConnector> {
        Arc::new(self.clone())
    }
}

impl AdminConnector for FakeServer {
    fn connect(&self, options: &AdminConnectOptions) -> TenancyResult<Box<dyn AdminConnection>> {
        let mut state = self.state.lock();
        state.connections.push(options.clone());
        if state.failure == Some(Failure::UnknownServer) {
            return Err(BackendError::ConnectionFailed {
                backend_name: options.adapter.clone(),
                message: format!("unknown server host {:?}", options.host),
            }
            .into());
        }
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<ServerState>>,
}

impl AdminConnection for FakeConnection {
    fn execute(&mut self, sql: &str) -> TenancyResult<Vec<Row>> {
        let mut state = self.state.lock();
        state.statements.push(sql.to_string());

        match state.failure {
            Some(Failure::UnknownDatabase) => {
                return Err(BackendError::NoSuchDatabase {
                    database: "information_schema".to_string(),
                }
                .into());
            }
            Some(Failure::QueryRejected) => {
                return Err(BackendError::QueryFailed {
                    message: "access denied".to_string(),
                }
                .into());
            }
            _ => {}
        }

        if let Some(literal) = sql.strip_prefix("SHOW DATABASES LIKE ") {
            let pattern = unquote(literal);
            return Ok(state
                .databases
                .iter()
                .filter(|name| like_matches(&pattern, name))
                .map(|name| vec![Some(name.clone())])
                .collect());
        }
        if let Some(rest) = sql.strip_prefix("CREATE DATABASE IF NOT EXISTS ") {
            let name = identifier(rest);
            state.databases.insert(name);
            return Ok(Vec::new());
        }
        if let Some(rest) = sql.strip_prefix("DROP DATABASE IF EXISTS ") {
            let name = identifier(rest);
            state.databases.remove(&name);
            return Ok(Vec::new());
        }

        Err(BackendError::QueryFailed {
            message: format!("fake server does not understand {sql:?}"),
        }
        .into())
    }

    fn close(&mut self) -> TenancyResult<()> {
        self.state.lock().closed += 1;
        Ok(())
    }
}

/// Reads a backtick-quoted identifier at the start of `sql`.
fn identifier(sql: &str) -> String {
    let inner = sql.strip_prefix('`').unwrap_or(sql);
    let mut name = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '`' {
            if chars.peek() == Some(&'`') {
                chars.next();
                name.push('`');
                continue;
            }
            break;
        }
        name.push(c);
    }
    name
}

/// Undoes string-literal quoting the way the server does.
pub fn unquote(literal: &str) -> String {
    let inner = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(literal);
    let mut value = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('\\', Some(&'\\')) | ('\'', Some(&'\'')) => {
                value.push(c);
                chars.next();
            }
            _ => value.push(c),
        }
    }
    value
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LikeToken {
    Literal(char),
    AnySequence,
    AnyChar,
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            '%' => LikeToken::AnySequence,
            '_' => LikeToken::AnyChar,
            other => LikeToken::Literal(other),
        });
    }
    tokens
}

fn like_match_from(tokens: &[LikeToken], name: &[char]) -> bool {
    match tokens.split_first() {
        None => name.is_empty(),
        Some((LikeToken::AnySequence, rest)) => {
            (0..=name.len()).any(|skip| like_match_from(rest, &name[skip..]))
        }
        Some((LikeToken::AnyChar, rest)) => !name.is_empty() && like_match_from(rest, &name[1..]),
        Some((LikeToken::Literal(c), rest)) => {
            name.first() == Some(c) && like_match_from(rest, &name[1..])
        }
    }
}

/// SQL `LIKE` with `\` as the escape character.
pub fn like_matches(pattern: &str, name: &str) -> bool {
    let name: Vec<char> = name.chars().collect();
    like_match_from(&like_tokens(pattern), &name)
}

// ============================================================================
// Fixtures
// ============================================================================

/// A file template rooted in `dir`.
pub fn file_template(dir: &Path, relative: &str) -> DatabaseTemplate {
    DatabaseTemplate::new("sqlite", format!("{}/{}", dir.display(), relative))
}

/// A MySQL template with charset and collation set.
pub fn server_template(database: &str) -> DatabaseTemplate {
    DatabaseTemplate::new("mysql", database)
        .with_host("db.internal")
        .with_port(3306)
        .with_credentials("root", "secret")
        .with_charset("utf8mb4")
        .with_collation("utf8mb4_unicode_ci")
}

//! Unit Script
//!
//! The line-oriented language executed by the built-in loaders. One
//! statement per line, `#` starts a comment line:
//!
//! ```text
//! let NAME = EXPR          # bind NAME in the unit namespace
//! import a.b.c [as NAME]   # load a unit, bind it (default: last segment)
//! export VAR = EXPR        # set an environment variable
//! raise EXPR               # fail the load with EXPR as the message
//! ```
//!
//! Expressions: `"text"`, integers, `true`/`false`, `name` or `name.attr`
//! (attributes of an imported unit), `$env(VAR)`, `$env(VAR, "default")`,
//! `$path`, `$executions` and `$name`.
//!
//! Statements run as they are read, so a unit importing a partially
//! executed unit sees the names bound so far.

use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;

use super::loader::{ExecError, Source};
use super::unit::Value;
use crate::host::ExecContext;

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Let { name: String, expr: Expr },
    Import { ident: String, alias: Option<String> },
    Export { var: String, expr: Expr },
    Raise(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Ref(Vec<String>),
    Env { var: String, default: Option<String> },
    SearchPath,
    Executions,
    UnitName,
}

struct Grammar {
    let_stmt: Regex,
    import_stmt: Regex,
    export_stmt: Regex,
    raise_stmt: Regex,
    env_expr: Regex,
    ref_expr: Regex,
}

fn grammar() -> Result<&'static Grammar, String> {
    static GRAMMAR: OnceLock<Result<Grammar, String>> = OnceLock::new();
    GRAMMAR.get_or_init(compile_grammar).as_ref().map_err(|e| e.clone())
}

fn compile_grammar() -> Result<Grammar, String> {
    let compile = |pattern: &str| Regex::new(pattern).map_err(|e| e.to_string());
    Ok(Grammar {
        let_stmt: compile(r"^let\s+([A-Za-z_]\w*)\s*=\s*(.+)$")?,
        import_stmt: compile(
            r"^import\s+([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)(?:\s+as\s+([A-Za-z_]\w*))?$",
        )?,
        export_stmt: compile(r"^export\s+([A-Za-z_]\w*)\s*=\s*(.+)$")?,
        raise_stmt: compile(r"^raise\s+(.+)$")?,
        env_expr: compile(r#"^\$env\(\s*([A-Za-z_]\w*)\s*(?:,\s*"([^"]*)"\s*)?\)$"#)?,
        ref_expr: compile(r"^[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*$")?,
    })
}

fn parse_statement(line: &str) -> Result<Statement, String> {
    let g = grammar()?;
    if let Some(caps) = g.import_stmt.captures(line) {
        return Ok(Statement::Import {
            ident: caps[1].to_string(),
            alias: caps.get(2).map(|m| m.as_str().to_string()),
        });
    }
    if let Some(caps) = g.let_stmt.captures(line) {
        return Ok(Statement::Let {
            name: caps[1].to_string(),
            expr: parse_expr(&caps[2])?,
        });
    }
    if let Some(caps) = g.export_stmt.captures(line) {
        return Ok(Statement::Export {
            var: caps[1].to_string(),
            expr: parse_expr(&caps[2])?,
        });
    }
    if let Some(caps) = g.raise_stmt.captures(line) {
        return Ok(Statement::Raise(parse_expr(&caps[1])?));
    }
    Err(format!("unrecognised statement '{line}'"))
}

fn parse_expr(text: &str) -> Result<Expr, String> {
    let text = text.trim();
    let g = grammar()?;

    if let Some(body) = text.strip_prefix('"') {
        return match body.strip_suffix('"') {
            Some(inner) if !inner.contains('"') => Ok(Expr::Literal(Value::Str(inner.to_string()))),
            _ => Err(format!("unterminated string {text}")),
        };
    }
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Expr::Literal(Value::Int(n)));
    }
    match text {
        "true" => return Ok(Expr::Literal(Value::Bool(true))),
        "false" => return Ok(Expr::Literal(Value::Bool(false))),
        "$path" => return Ok(Expr::SearchPath),
        "$executions" => return Ok(Expr::Executions),
        "$name" => return Ok(Expr::UnitName),
        _ => {}
    }
    if let Some(caps) = g.env_expr.captures(text) {
        return Ok(Expr::Env {
            var: caps[1].to_string(),
            default: caps.get(2).map(|m| m.as_str().to_string()),
        });
    }
    if g.ref_expr.is_match(text) {
        return Ok(Expr::Ref(text.split('.').map(str::to_string).collect()));
    }
    Err(format!("invalid expression '{text}'"))
}

fn eval(expr: &Expr, cx: &ExecContext<'_>) -> Result<Value, ExecError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ref(parts) => resolve_ref(parts, cx),
        Expr::Env { var, default } => match (cx.var(var), default) {
            (Some(value), _) => Ok(Value::Str(value)),
            (None, Some(default)) => Ok(Value::Str(default.clone())),
            (None, None) => Err(ExecError::MissingEnv(var.clone())),
        },
        Expr::SearchPath => Ok(Value::List(
            cx.search_path()
                .iter()
                .map(|p| Value::Str(p.display().to_string()))
                .collect(),
        )),
        Expr::Executions => Ok(Value::Int(i64::from(cx.executions()))),
        Expr::UnitName => Ok(Value::Str(cx.unit().identifier().to_string())),
    }
}

fn resolve_ref(parts: &[String], cx: &ExecContext<'_>) -> Result<Value, ExecError> {
    let unknown = || ExecError::UnknownName(parts.join("."));
    let (first, attrs) = parts.split_first().ok_or_else(unknown)?;
    let mut value = cx.lookup(first).ok_or_else(unknown)?;
    for attr in attrs {
        value = match &value {
            Value::Unit(unit) => unit.get(attr).ok_or_else(unknown)?,
            _ => return Err(unknown()),
        };
    }
    Ok(value)
}

fn execute(statement: Statement, cx: &ExecContext<'_>) -> Result<(), ExecError> {
    match statement {
        Statement::Let { name, expr } => {
            let value = eval(&expr, cx)?;
            cx.define(name, value);
        }
        Statement::Import { ident, alias } => {
            let unit = cx.import(&ident).map_err(|e| ExecError::Import {
                ident: ident.clone(),
                source: Box::new(e),
            })?;
            let name = alias.unwrap_or_else(|| unit.identifier().name().to_string());
            cx.define(name, Value::Unit(unit));
        }
        Statement::Export { var, expr } => {
            let value = eval(&expr, cx)?;
            cx.set_var(&var, &value.to_string());
        }
        Statement::Raise(expr) => {
            let value = eval(&expr, cx)?;
            return Err(ExecError::Raised(value.to_string()));
        }
    }
    Ok(())
}

/// Execute `source` statement by statement into the unit behind `cx`.
pub fn run(source: &Source, cx: &ExecContext<'_>) -> Result<(), ExecError> {
    for (index, raw) in source.text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let statement = parse_statement(line).map_err(|message| ExecError::Syntax {
            origin: source.origin.clone(),
            line: index + 1,
            message,
        })?;
        trace!(target: "subsession::script", unit = %cx.unit().identifier(), ?statement, "execute");
        execute(statement, cx)?;
    }
    Ok(())
}

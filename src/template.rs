//! SQL statement rewriting.
//!
//! The input SQL carries parameter sites of the form `?{type,...}` (or bare
//! `?` when the specs come from `-params`). Parsing replaces every site with
//! a plain `?` placeholder and records the ordered specifier list, so each
//! worker can build its own generator instances from the same template.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::data::DataTable;
use crate::error::{DriverError, Result};
use crate::generator::ValueGenerator;

static PARAM_SITE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\?(\{[^{]+\})?").unwrap());
static SPEC_LIST_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" *; *").unwrap());

/// The statement kinds the workers know how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Select,
    Insert,
    Update,
    Delete,
    Execute,
}

impl Verb {
    fn parse(token: &str) -> Option<Verb> {
        match token.to_ascii_uppercase().as_str() {
            "SELECT" => Some(Verb::Select),
            "INSERT" => Some(Verb::Insert),
            "UPDATE" => Some(Verb::Update),
            "DELETE" => Some(Verb::Delete),
            "EXECUTE" => Some(Verb::Execute),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Select => "SELECT",
            Verb::Insert => "INSERT",
            Verb::Update => "UPDATE",
            Verb::Delete => "DELETE",
            Verb::Execute => "EXECUTE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable result of parsing the input SQL: placeholder-only text, the
/// leading verb, and one specifier per placeholder.
#[derive(Debug, Clone)]
pub struct StatementTemplate {
    sql: String,
    verb: Verb,
    param_specs: Vec<String>,
}

impl StatementTemplate {
    /// Parse the raw SQL. `params`, when configured, is a semicolon-separated
    /// list whose k-th entry overrides the k-th inline `{...}` body.
    pub fn parse(sql_text: &str, params: Option<&str>) -> Result<Self> {
        let overrides: Vec<&str> = params
            .map(|list| SPEC_LIST_SPLIT.split(list).collect())
            .unwrap_or_default();

        let mut param_specs = Vec::new();
        let mut rewritten = String::with_capacity(sql_text.len());
        let mut cursor = 0;

        for (index, caps) in PARAM_SITE.captures_iter(sql_text).enumerate() {
            let site = caps.get(0).expect("group 0 always participates");
            let inline = caps.get(1).map(|m| m.as_str());
            let spec = overrides
                .get(index)
                .copied()
                .filter(|s| !s.is_empty())
                .or(inline)
                .ok_or(DriverError::MissingParamSpec { index })?;
            param_specs.push(spec.to_string());

            rewritten.push_str(&sql_text[cursor..site.start()]);
            rewritten.push('?');
            cursor = site.end();
        }
        rewritten.push_str(&sql_text[cursor..]);

        // the first space-delimited token must be the verb; leading
        // whitespace or a comment is a fatal input error
        let token = rewritten.split(' ').next().unwrap_or("");
        let verb = Verb::parse(token).ok_or_else(|| DriverError::BadVerb {
            sql: rewritten.clone(),
        })?;

        Ok(Self {
            sql: rewritten,
            verb,
            param_specs,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn param_specs(&self) -> &[String] {
        &self.param_specs
    }

    /// Fresh generator instances for one worker.
    pub fn generators(&self, table: &Arc<DataTable>) -> Result<Vec<ValueGenerator>> {
        self.param_specs
            .iter()
            .map(|spec| ValueGenerator::parse(spec, table))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Value;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table() -> Arc<DataTable> {
        Arc::new(DataTable::default())
    }

    #[test]
    fn inline_specs_are_extracted_and_rewritten() {
        let template = StatementTemplate::parse(
            "SELECT ?{int,1,10} FROM T WHERE x < ?{int,1900,2010}",
            None,
        )
        .unwrap();
        assert_eq!(template.sql(), "SELECT ? FROM T WHERE x < ?");
        assert_eq!(template.verb(), Verb::Select);
        assert_eq!(template.param_specs(), ["{int,1,10}", "{int,1900,2010}"]);

        let generators = template.generators(&table()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            match generators[0].next_value(&mut rng) {
                Value::Int(v) => assert!((1..10).contains(&v)),
                other => panic!("unexpected {other:?}"),
            }
            match generators[1].next_value(&mut rng) {
                Value::Int(v) => assert!((1900..2010).contains(&v)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn placeholder_count_matches_generator_count() {
        for sql in [
            "SELECT 1",
            "SELECT ?{int,1,2}",
            "INSERT INTO t VALUES (?{int,1,2}, ?{string,3,9}, ?{boolean,30})",
            "UPDATE t SET a = ?{long,0,9} WHERE b = ?{int,0,5}",
        ] {
            let template = StatementTemplate::parse(sql, None).unwrap();
            let placeholders = template.sql().matches('?').count();
            assert_eq!(placeholders, template.param_specs().len(), "sql: {sql}");
            assert!(!template.sql().contains('{'), "sql: {sql}");
        }
    }

    #[test]
    fn params_option_overrides_inline_specs() {
        let template = StatementTemplate::parse(
            "SELECT ?{int,1,10} FROM T WHERE y = ?{int,5,6}",
            Some("{string,2,4}; {boolean,10}"),
        )
        .unwrap();
        assert_eq!(template.param_specs(), ["{string,2,4}", "{boolean,10}"]);
    }

    #[test]
    fn params_option_fills_bare_placeholders() {
        let template =
            StatementTemplate::parse("SELECT * FROM t WHERE a = ?", Some("{int,1,10}")).unwrap();
        assert_eq!(template.sql(), "SELECT * FROM t WHERE a = ?");
        assert_eq!(template.param_specs(), ["{int,1,10}"]);
    }

    #[test]
    fn bare_placeholder_without_any_spec_is_fatal() {
        let err = StatementTemplate::parse("SELECT * FROM t WHERE a = ?", None).unwrap_err();
        assert!(matches!(err, DriverError::MissingParamSpec { index: 0 }));
    }

    #[test]
    fn verbs_are_case_insensitive() {
        let template = StatementTemplate::parse("delete from t where a = 1", None).unwrap();
        assert_eq!(template.verb(), Verb::Delete);
    }

    #[test]
    fn unknown_verb_is_fatal() {
        let err = StatementTemplate::parse("TRUNCATE TABLE t", None).unwrap_err();
        assert!(matches!(err, DriverError::BadVerb { .. }));
    }

    #[test]
    fn leading_whitespace_is_a_fatal_input_error() {
        assert!(StatementTemplate::parse(" SELECT 1", None).is_err());
        assert!(StatementTemplate::parse("-- comment\nSELECT 1", None).is_err());
    }
}

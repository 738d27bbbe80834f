//! Run-time options.
//!
//! Options follow a property-bag model: everything arrives as text, from the
//! command line or a properties file, with `${name}` references resolved
//! against the merged bag. Recognised options become the typed [`Config`];
//! unrecognised keys ride along to the datasource untouched, which is how
//! database-specific connection properties pass through.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::warn;

use crate::error::{DriverError, Result};

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([^=: ]+)[=:](.+)$").unwrap());
static VARIABLE_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Default workload when `-sql` is not given.
pub const DEFAULT_SQL: &str = "SELECT * FROM User.Teams WHERE year < ?{int,1910,2010}";

const NANOS_PER_SECOND: f64 = 1e9;
const DEFAULT_HISTORY_SIZE: usize = 10_000;

/// The recognised option names. Anything else on the command line is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opt {
    Url,
    User,
    Password,
    Threads,
    Time,
    Batch,
    Rate,
    Load,
    Report,
    Config,
    Property,
    Logging,
    Data,
    Iterate,
    Sql,
    Params,
    Check,
    Help,
}

impl Opt {
    pub const ALL: [Opt; 18] = [
        Opt::Url,
        Opt::User,
        Opt::Password,
        Opt::Threads,
        Opt::Time,
        Opt::Batch,
        Opt::Rate,
        Opt::Load,
        Opt::Report,
        Opt::Config,
        Opt::Property,
        Opt::Logging,
        Opt::Data,
        Opt::Iterate,
        Opt::Sql,
        Opt::Params,
        Opt::Check,
        Opt::Help,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Opt::Url => "url",
            Opt::User => "user",
            Opt::Password => "password",
            Opt::Threads => "threads",
            Opt::Time => "time",
            Opt::Batch => "batch",
            Opt::Rate => "rate",
            Opt::Load => "load",
            Opt::Report => "report",
            Opt::Config => "config",
            Opt::Property => "property",
            Opt::Logging => "logging",
            Opt::Data => "data",
            Opt::Iterate => "iterate",
            Opt::Sql => "sql",
            Opt::Params => "params",
            Opt::Check => "check",
            Opt::Help => "help",
        }
    }

    pub fn default_value(self) -> Option<&'static str> {
        match self {
            Opt::Threads => Some("10"),
            Opt::Time => Some("1"),
            Opt::Batch => Some("1"),
            Opt::Load => Some("95"),
            Opt::Report => Some("1"),
            Opt::Iterate => Some("false"),
            Opt::Sql => Some(DEFAULT_SQL),
            Opt::Check => Some("false"),
            Opt::Help => Some("false"),
            _ => None,
        }
    }

    fn description(self) -> &'static str {
        match self {
            Opt::Url => "the database connection URL - required",
            Opt::User => "the authentication user for the database connection - required",
            Opt::Password => "the password for the authentication user - required",
            Opt::Threads => "the number of SQL workers to run",
            Opt::Time => "the time in seconds to run the workload",
            Opt::Batch => "the number of statements to batch into each commit",
            Opt::Rate => "the target rate of transactions per second",
            Opt::Load => "the target database load percentage; workers sleep to hold it",
            Opt::Report => "time period in seconds to report statistics",
            Opt::Config => "path to a key=value config file; command-line options win",
            Opt::Property => "add a name=value (or name:value) pair to the property set",
            Opt::Logging => "default log filter directives (RUST_LOG overrides)",
            Opt::Data => "path to a data file (.csv parses as CSV, otherwise words) for 'value' parameters",
            Opt::Iterate => "enable/disable iteration through all rows of each query",
            Opt::Sql => "the SQL statement to run on the SQL workers",
            Opt::Params => "semicolon-separated value specifiers overriding those in the SQL",
            Opt::Check => "show the resolved values for options",
            Opt::Help => "show this help text and exit",
        }
    }

    pub fn from_name(name: &str) -> Option<Opt> {
        Opt::ALL
            .iter()
            .copied()
            .find(|opt| opt.name().eq_ignore_ascii_case(name))
    }
}

const PARAM_HELP: &str = "
  Parameter specifications are separated by semicolons, each in the form
  {type,format,X,Y,parseFormat} where:
    - type is one of [int, long, string, boolean, date, value];
    - format is a printf-style template, or can be omitted completely;
    - X and Y define the range of generated values:
       - int, long, date: the first (X) and last (Y) in the value range;
       - string: shortest (X) and longest (Y) string length;
       - boolean: X is the relative percentage of true values (default=50);
       - value: X => first valid line (X=1 => skip first line); Y => column number;
    - parseFormat is a chrono format string for parsing 'date' bounds.

  Examples:
    {int,1900,2011}          an integer between 1900 and 2011
    {int,user-%d,100,999}    an integer rendered as the string \"user-n\"
    {string,5,10}            a random string between 5 and 10 characters long
    {boolean,30}             true 30% of the time
    {date,%Y,1910/1/1,2011/12/31}  a random date rendered through chrono
    {value,1,0}              column 0 of a random data line, skipping line 0

  Every '?' in the SQL is replaced by a value generated according to the
  corresponding specifier.";

/// Build the usage text from the option table.
pub fn help_text() -> String {
    let mut out = String::with_capacity(2048);
    out.push_str("Usage: sqldrive [-option[=| ]value] [-option ...]\n");
    out.push_str("  Options can be specified on the command-line or loaded from a file - see the -config option.\n");
    out.push_str("  A command-line option can be in any of the forms: -option=value; -option value; or -option[=true];\n");
    out.push_str("  where -option is one of the options below:\n");
    for opt in Opt::ALL {
        let default = match opt.default_value() {
            Some(value) => format!("default={value}"),
            None => "optional".to_string(),
        };
        let _ = writeln!(out, "   -{:<10}-> {} - {}", opt.name(), opt.description(), default);
    }
    out.push_str(PARAM_HELP);
    out
}

/// The merged name-to-value bag.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    /// Parse command-line arguments. Accepted forms: `-opt=value`,
    /// `-opt:value`, `-opt value`, and bare `-opt` meaning `-opt=true`.
    /// Option names must be recognised; `-property` smuggles arbitrary
    /// name/value pairs into the bag.
    pub fn parse_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut props = Properties::default();
        let mut pending: Option<String> = None;

        for arg in args {
            let arg = arg.as_ref();
            if let Some(stripped) = arg.strip_prefix('-') {
                if let Some(name) = pending.take() {
                    props.set(&name, "true");
                }
                let (name, value) = match ASSIGNMENT.captures(stripped) {
                    Some(caps) => (caps[1].to_string(), Some(caps[2].to_string())),
                    None => (stripped.to_string(), None),
                };
                if Opt::from_name(name.trim()).is_none() {
                    return Err(DriverError::InvalidOption { name });
                }
                match value {
                    Some(value) => props.set_option(&name, &value)?,
                    None => pending = Some(name.trim().to_lowercase()),
                }
            } else if let Some(name) = pending.take() {
                props.set_option(&name, arg)?;
            } else {
                return Err(DriverError::DanglingValue {
                    value: arg.to_string(),
                });
            }
        }
        if let Some(name) = pending {
            props.set(&name, "true");
        }

        Ok(props)
    }

    fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        if name.eq_ignore_ascii_case(Opt::Property.name()) {
            let caps = ASSIGNMENT.captures(value).ok_or_else(|| {
                DriverError::invalid_value("property", value, "expected name=value or name:value")
            })?;
            let name = caps[1].to_string();
            let value = caps[2].to_string();
            self.set(&name, &value);
        } else {
            self.set(name, value);
        }
        Ok(())
    }

    /// Insert a value. Recognised option names are stored lower-cased so
    /// `-URL` and `-url` land on the same key.
    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(canonical(name), value.to_string());
    }

    /// Merge a `key=value` properties file; keys already in the bag (the
    /// command line) win. `#` and `!` lines are comments.
    pub fn merge_file(&mut self, path: &str) -> Result<()> {
        let text = fs::read_to_string(path).map_err(|e| DriverError::io(path, e))?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (name, value) = match line.find(['=', ':']) {
                Some(at) => (line[..at].trim(), line[at + 1..].trim()),
                None => (line, "true"),
            };
            let key = canonical(name);
            if !self.values.contains_key(&key) {
                self.values.insert(key, value.to_string());
            }
        }
        Ok(())
    }

    /// Resolve `${name}` references in every value against a snapshot of the
    /// bag taken before resolution starts: a single pass, deliberately not
    /// recursive, and independent of iteration order. Unknown references are
    /// left as-is.
    pub fn resolve_variables(&mut self) {
        let snapshot = self.values.clone();
        for value in self.values.values_mut() {
            if !value.contains("${") {
                continue;
            }
            let resolved = VARIABLE_REF.replace_all(value, |caps: &regex::Captures<'_>| {
                snapshot
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            });
            *value = resolved.into_owned();
        }
    }

    /// The value for an option, falling back to its default.
    pub fn get(&self, opt: Opt) -> Option<&str> {
        self.values
            .get(opt.name())
            .map(String::as_str)
            .or_else(|| opt.default_value())
    }

    /// True when the option was explicitly set (defaults don't count).
    pub fn is_set(&self, opt: Opt) -> bool {
        self.values.contains_key(opt.name())
    }

    pub fn flag(&self, opt: Opt) -> bool {
        self.get(opt).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Bag entries that are not recognised options: the datasource pass-through.
    pub fn extras(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter(|(name, _)| Opt::from_name(name).is_none())
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

fn canonical(name: &str) -> String {
    match Opt::from_name(name.trim()) {
        Some(opt) => opt.name().to_string(),
        None => name.trim().to_string(),
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        write!(f, "{{")?;
        for (name, value) in &self.values {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        write!(f, "}}")
    }
}

/// Fully validated, typed run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub user: String,
    pub password: String,
    pub threads: usize,
    pub time: u64,
    pub batch: u32,
    pub rate: Option<f64>,
    pub load: u32,
    pub report: u64,
    pub data: Option<PathBuf>,
    pub iterate: bool,
    pub sql: String,
    pub params: Option<String>,
    pub extras: BTreeMap<String, String>,
}

impl Config {
    pub fn from_props(props: &Properties) -> Result<Self> {
        let url = props.get(Opt::Url);
        let user = props.get(Opt::User);
        let password = props.get(Opt::Password);
        let (Some(url), Some(user), Some(password)) = (url, user, password) else {
            return Err(DriverError::MissingRequired);
        };

        let config = Self {
            url: url.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            threads: parse_field(props, Opt::Threads)?,
            time: parse_field(props, Opt::Time)?,
            batch: parse_field(props, Opt::Batch)?,
            rate: props
                .is_set(Opt::Rate)
                .then(|| parse_field(props, Opt::Rate))
                .transpose()?,
            load: parse_field(props, Opt::Load)?,
            report: parse_field(props, Opt::Report)?,
            data: props.get(Opt::Data).map(PathBuf::from),
            iterate: props.flag(Opt::Iterate),
            sql: props.get(Opt::Sql).unwrap_or(DEFAULT_SQL).to_string(),
            params: props.get(Opt::Params).map(str::to_string),
            extras: props
                .extras()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        };
        config.validate(props.is_set(Opt::Load))?;
        Ok(config)
    }

    fn validate(&self, load_explicit: bool) -> Result<()> {
        if self.threads == 0 {
            return Err(DriverError::invalid_value("threads", "0", "must be > 0"));
        }
        if self.batch == 0 {
            return Err(DriverError::invalid_value("batch", "0", "must be > 0"));
        }
        if !(1..=100).contains(&self.load) {
            return Err(DriverError::invalid_value(
                "load",
                self.load.to_string(),
                "must be between 1 and 100 inclusive",
            ));
        }
        if let Some(rate) = self.rate {
            if rate <= 0.0 {
                return Err(DriverError::invalid_value(
                    "rate",
                    rate.to_string(),
                    "must be > 0",
                ));
            }
            // each worker needs at least two transactions for the sliding
            // average to mean anything
            if rate * (self.time as f64) < (2 * self.threads) as f64 {
                return Err(DriverError::invalid_value(
                    "rate",
                    rate.to_string(),
                    format!(
                        "projected total transactions {} < 2 per worker ({} workers)",
                        rate * self.time as f64,
                        self.threads
                    ),
                ));
            }
            if load_explicit {
                warn!("both -rate and -load set - only rate will have an effect, and load will be ignored");
            }
        }
        Ok(())
    }

    /// Target per-worker transaction time in nanoseconds, 0 when unpaced.
    pub fn target_tx_time(&self) -> u64 {
        match self.rate {
            Some(rate) if rate > 0.0 => (NANOS_PER_SECOND * self.threads as f64 / rate) as u64,
            _ => 0,
        }
    }

    /// Sleep-to-work ratio applied in load mode; 0 at load=100.
    pub fn desaturation(&self) -> f64 {
        if self.load > 0 && self.load < 100 {
            (100 - self.load) as f64 / self.load as f64
        } else {
            0.0
        }
    }

    /// Ring capacity: one slot per expected transaction, floored at 10000.
    pub fn history_capacity(&self) -> usize {
        let expected = self.rate.unwrap_or(0.0) * self.threads as f64 * self.time as f64;
        (expected as usize).max(DEFAULT_HISTORY_SIZE)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.time)
    }

    pub fn report_period(&self) -> Duration {
        Duration::from_secs(self.report)
    }

    /// The URL handed to the pool: credentials as userinfo and every
    /// unrecognised bag entry as a query parameter, so database-specific
    /// properties pass through. `sqlite:` URLs have neither and pass
    /// through untouched.
    pub fn datasource_url(&self) -> String {
        if self.url.starts_with("sqlite") {
            return self.url.clone();
        }
        let mut url = self.url.clone();
        if let Some(scheme_end) = url.find("://") {
            let authority = scheme_end + 3;
            if !url[authority..].contains('@') {
                url.insert_str(authority, &format!("{}:{}@", self.user, self.password));
            }
        }
        for (name, value) in &self.extras {
            url.push(if url.contains('?') { '&' } else { '?' });
            let _ = write!(url, "{name}={value}");
        }
        url
    }
}

fn parse_field<T: FromStr>(props: &Properties, opt: Opt) -> Result<T> {
    // only called for options that are set or carry a default
    let raw = props.get(opt).unwrap_or_default();
    raw.parse()
        .map_err(|_| DriverError::invalid_value(opt.name(), raw, "not a valid number"))
}

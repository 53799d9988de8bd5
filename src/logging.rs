//! Scope-keyed log control on top of the [`log`] facade.
//!
//! A process-wide registry maps a scope name (a module path, or
//! [`ALL_SCOPES`] as wildcard) to a log level and a category bitmask.
//! [`LevelLogger`] is a facade backend that consults the registry per
//! record, writing errors to stderr and everything else to stdout.
//!
//! These facilities are configuration, not load-bearing: the event
//! machinery works identically when no logger is installed.

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Mutex, OnceLock};

/// Wildcard scope name. Setting it updates the default applied to
/// unlisted scopes and every scope already registered.
pub const ALL_SCOPES: &str = "all";

/// Ordinary traffic.
pub const CAT_DEFAULT: u32 = 0x0000_0001;

/// Entry/exit tracing.
pub const CAT_TRACE: u32 = 0x0000_0002;

/// Every category.
pub const CAT_ALL: u32 = u32::MAX;

#[derive(Clone, Copy)]
struct ScopeConfig {
    level: LevelFilter,
    categories: u32,
}

struct Registry {
    default: ScopeConfig,
    scopes: HashMap<String, ScopeConfig>,
}

impl Registry {
    /// Longest matching entry for a record target, falling back to
    /// the wildcard default. `evoke::selector` matches an `evoke`
    /// entry unless a more specific one exists.
    fn lookup(&self, target: &str) -> ScopeConfig {
        if let Some(cfg) = self.scopes.get(target) {
            return *cfg;
        }
        self.scopes
            .iter()
            .filter(|(name, _)| {
                target.starts_with(name.as_str())
                    && target[name.len()..].starts_with("::")
            })
            .max_by_key(|(name, _)| name.len())
            .map(|(_, cfg)| *cfg)
            .unwrap_or(self.default)
    }
}

/// Entries are created on first set and never removed during the
/// process lifetime.
fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry {
            default: ScopeConfig {
                level: LevelFilter::Warn,
                categories: CAT_DEFAULT,
            },
            scopes: HashMap::new(),
        })
    })
}

/// Sets the level for `scope`, creating the entry if needed.
///
/// Returns whether a named entry already existed. [`ALL_SCOPES`]
/// updates the default and every registered scope, and returns true.
pub fn set_level(scope: &str, level: LevelFilter) -> bool {
    let mut reg = registry().lock().unwrap();
    if scope == ALL_SCOPES {
        reg.default.level = level;
        for cfg in reg.scopes.values_mut() {
            cfg.level = level;
        }
        return true;
    }

    let default = reg.default;
    let existed = reg.scopes.contains_key(scope);
    reg.scopes.entry(scope.to_owned()).or_insert(default).level = level;
    existed
}

/// Sets the category bitmask for `scope`; same rules as
/// [`set_level`].
pub fn set_categories(scope: &str, categories: u32) -> bool {
    let mut reg = registry().lock().unwrap();
    if scope == ALL_SCOPES {
        reg.default.categories = categories;
        for cfg in reg.scopes.values_mut() {
            cfg.categories = categories;
        }
        return true;
    }

    let default = reg.default;
    let existed = reg.scopes.contains_key(scope);
    reg.scopes
        .entry(scope.to_owned())
        .or_insert(default)
        .categories = categories;
    existed
}

/// Returns the level in effect for `scope`.
pub fn level(scope: &str) -> LevelFilter {
    registry().lock().unwrap().lookup(scope).level
}

/// Returns the category bitmask in effect for `scope`.
pub fn categories(scope: &str) -> u32 {
    registry().lock().unwrap().lookup(scope).categories
}

/// Returns the registered scope names, in no particular order.
pub fn names() -> Vec<String> {
    registry().lock().unwrap().scopes.keys().cloned().collect()
}

/// Asks the installed logger to flush buffered output.
pub fn flush() {
    log::logger().flush();
}

/// A [`log::Log`] backend filtered through the scope registry.
///
/// Errors go to stderr, everything else to stdout, serialized by an
/// output lock.
pub struct LevelLogger {
    output: Mutex<()>,
}

impl LevelLogger {
    /// Installs a `LevelLogger` as the process logger and seeds the
    /// wildcard default with `default_level`. Fails if another logger
    /// is already installed.
    pub fn init(default_level: LevelFilter) -> Result<(), SetLoggerError> {
        set_level(ALL_SCOPES, default_level);
        log::set_max_level(LevelFilter::Trace);
        log::set_boxed_logger(Box::new(LevelLogger {
            output: Mutex::new(()),
        }))
    }
}

impl Log for LevelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= level(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let _lock = self.output.lock().unwrap();
        let line = format!(
            "[{:<5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        if record.level() == Level::Error {
            let _ = writeln!(io::stderr(), "{line}");
        } else {
            let _ = writeln!(io::stdout(), "{line}");
        }
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The registry is process-global, so every case runs in one test
    // body to keep them from interfering.
    #[test]
    fn registry_set_get_round_trip() {
        assert!(!set_level("evoke::selector", LevelFilter::Debug));
        assert_eq!(level("evoke::selector"), LevelFilter::Debug);
        assert!(set_level("evoke::selector", LevelFilter::Trace));
        assert_eq!(level("evoke::selector"), LevelFilter::Trace);

        // Prefix matching picks the nearest ancestor scope.
        assert_eq!(level("evoke::selector::wake"), LevelFilter::Trace);
        // A name sharing a prefix without a path separator is not a match.
        set_level(ALL_SCOPES, LevelFilter::Warn);
        assert_eq!(level("evoke::selectors"), LevelFilter::Warn);

        assert!(!set_categories("evoke::timer", CAT_TRACE));
        assert_eq!(categories("evoke::timer"), CAT_TRACE);

        set_categories(ALL_SCOPES, CAT_ALL);
        assert_eq!(categories("evoke::timer"), CAT_ALL);
        assert_eq!(categories("unregistered"), CAT_ALL);

        let names = names();
        assert!(names.contains(&"evoke::selector".to_owned()));
        assert!(names.contains(&"evoke::timer".to_owned()));
    }
}
